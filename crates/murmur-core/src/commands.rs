//! Slash commands typed into the message box.
//!
//! `/nc <address> <hello...>` adds a contact from a link,
//! `/clear <contact-id>` wipes a contact's history.

use thiserror::Error;

use murmur_shared::types::{AddressError, ContactId, PeerAddress};

use crate::contact::Contact;
use crate::error::Result;
use crate::node::Node;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("not a command")]
    NotACommand,

    #[error("unknown command: /{0}")]
    Unknown(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("invalid contact id: {0}")]
    BadContactId(String),

    #[error(transparent)]
    Address(#[from] AddressError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    NewContact { address: PeerAddress, hello: String },
    Clear { contact: ContactId },
}

/// What a successfully executed command did.
#[derive(Debug)]
pub enum Outcome {
    ContactAdded(Contact),
    Cleared(ContactId),
}

impl Command {
    pub fn parse(line: &str) -> std::result::Result<Self, CommandError> {
        let body = line.trim().strip_prefix('/').ok_or(CommandError::NotACommand)?;
        let mut words = body.split_whitespace();
        let name = words.next().ok_or(CommandError::NotACommand)?;

        match name {
            "nc" => {
                let link = words.next().ok_or(CommandError::MissingArgument("address"))?;
                let address = PeerAddress::parse(link)?;
                let hello = words.collect::<Vec<_>>().join(" ");
                Ok(Command::NewContact { address, hello })
            }
            "clear" => {
                let raw = words.next().ok_or(CommandError::MissingArgument("contact id"))?;
                let id = raw
                    .parse::<u64>()
                    .map_err(|_| CommandError::BadContactId(raw.to_string()))?;
                Ok(Command::Clear {
                    contact: ContactId(id),
                })
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Whether `line` should be treated as a command rather than text.
pub fn is_command(line: &str) -> bool {
    line.trim_start().starts_with('/')
}

impl Node {
    pub async fn run_command(&self, line: &str) -> Result<Outcome> {
        match Command::parse(line)? {
            Command::NewContact { address, hello } => {
                let contact = self.add_contact(address.as_str(), &hello)?;
                Ok(Outcome::ContactAdded(contact))
            }
            Command::Clear { contact } => {
                self.clear_messages(contact).await?;
                Ok(Outcome::Cleared(contact))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::node::tests::node;

    #[test]
    fn parse_new_contact() {
        let cmd = Command::parse("/nc  http://Bob.onion/  hello there  bob").unwrap();
        assert_eq!(
            cmd,
            Command::NewContact {
                address: PeerAddress::parse("bob.onion").unwrap(),
                hello: "hello there bob".into(),
            }
        );

        let bare = Command::parse("/nc bob.onion").unwrap();
        assert!(matches!(bare, Command::NewContact { hello, .. } if hello.is_empty()));
    }

    #[test]
    fn parse_clear() {
        assert_eq!(
            Command::parse("/clear 12").unwrap(),
            Command::Clear {
                contact: ContactId(12)
            }
        );
        assert!(matches!(
            Command::parse("/clear twelve"),
            Err(CommandError::BadContactId(_))
        ));
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(Command::parse("hello"), Err(CommandError::NotACommand)));
        assert!(matches!(Command::parse("/"), Err(CommandError::NotACommand)));
        assert!(matches!(Command::parse("/nc"), Err(CommandError::MissingArgument(_))));
        assert!(matches!(Command::parse("/clear"), Err(CommandError::MissingArgument(_))));
        assert!(matches!(Command::parse("/quit"), Err(CommandError::Unknown(n)) if n == "quit"));
        assert!(is_command("  /nc x"));
        assert!(!is_command("hi /nc"));
    }

    #[tokio::test]
    async fn run_commands() {
        let (_dir, node, _sink) = node("alice");
        let added = match node.run_command("/nc bob.onion hi bob").await.unwrap() {
            Outcome::ContactAdded(c) => c,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_eq!(added.hello_message, "hi bob");

        node.send_text(added.id, &["x"]).unwrap();
        let cleared = node.run_command(&format!("/clear {}", added.id)).await.unwrap();
        assert!(matches!(cleared, Outcome::Cleared(id) if id == added.id));
        assert!(node.last_messages(added.id, 5).unwrap().is_empty());

        assert!(matches!(
            node.run_command("/clear 99").await,
            Err(CoreError::ContactNotFound(_))
        ));
        assert!(matches!(
            node.run_command("/nc bob.onion again").await,
            Err(CoreError::DuplicateContact)
        ));
    }
}
