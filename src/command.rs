//! Translation of changes into host network-configuration commands.
//!
//! Each command is a flat list of tokens for the host tool. Nothing here
//! quotes or runs anything.

use std::fmt;

use crate::diff::{Change, Diff};
use crate::error::TranslateError;
use crate::model::{Interface, NatFan, NetworkEntity, Tunnel};

/// One host command as an ordered token list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(Vec<String>);

impl Command {
    /// The command tokens, in order.
    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    /// Consume the command, returning its tokens.
    pub fn into_tokens(self) -> Vec<String> {
        self.0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

/// An entity category the host tool knows how to create and remove.
pub trait HostCommand: NetworkEntity {
    /// Verb the host tool uses for this category.
    const VERB: &'static str;

    /// Arguments following `VERB` when creating the entity.
    fn add_args(&self) -> Result<Vec<String>, TranslateError>;
}

fn check_token(kind: &'static str, key: &str) -> Result<(), TranslateError> {
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(TranslateError::InvalidKey {
            kind,
            key: key.to_string(),
        });
    }
    Ok(())
}

fn require<T>(
    kind: &'static str,
    key: &str,
    field: &'static str,
    items: &[T],
) -> Result<(), TranslateError> {
    if items.is_empty() {
        return Err(TranslateError::MissingField {
            kind,
            key: key.to_string(),
            field,
        });
    }
    Ok(())
}

impl HostCommand for Interface {
    const VERB: &'static str = "dummy";

    fn add_args(&self) -> Result<Vec<String>, TranslateError> {
        require(Self::KIND, &self.name, "addresses", &self.addrs)?;
        Ok(self.addrs.iter().map(ToString::to_string).collect())
    }
}

impl HostCommand for NatFan {
    const VERB: &'static str = "natfan";

    fn add_args(&self) -> Result<Vec<String>, TranslateError> {
        require(Self::KIND, &self.name, "endpoints", &self.endpoints)?;
        let mut args = vec![format!("{}/128", self.entrypoint)];
        args.extend(self.endpoints.iter().map(ToString::to_string));
        Ok(args)
    }
}

impl HostCommand for Tunnel {
    const VERB: &'static str = "tunnel";

    fn add_args(&self) -> Result<Vec<String>, TranslateError> {
        Ok(vec![
            self.local.to_string(),
            self.remote.to_string(),
            self.addr.to_string(),
            self.remote_subnet.to_string(),
        ])
    }
}

impl<T: HostCommand> Change<T> {
    /// Host command realizing (`Add`) or undoing (`Remove`) this change.
    pub fn command(&self) -> Result<Command, TranslateError> {
        let key = self.key();
        check_token(T::KIND, key)?;

        let tokens = match self {
            Change::Add(item) => {
                let mut tokens = vec![T::VERB.to_string(), key.to_string()];
                tokens.extend(item.add_args()?);
                tokens
            }
            Change::Remove(_) => vec!["rm".to_string(), T::VERB.to_string(), key.to_string()],
        };
        Ok(Command(tokens))
    }
}

fn translate_all<T: HostCommand>(
    changes: &[Change<T>],
    out: &mut Vec<Command>,
) -> Result<(), TranslateError> {
    for change in changes {
        out.push(change.command()?);
    }
    Ok(())
}

/// Translate every host-level change of `diff`, interfaces first, then NAT
/// fans, then tunnels, each in diff order.
///
/// DNS records have no host command. Either every change translates or an
/// error is returned and no commands are produced.
pub fn translate_diff(diff: &Diff) -> Result<Vec<Command>, TranslateError> {
    let mut commands =
        Vec::with_capacity(diff.interfaces.len() + diff.natfans.len() + diff.tunnels.len());
    translate_all(&diff.interfaces, &mut commands)?;
    translate_all(&diff.natfans, &mut commands)?;
    translate_all(&diff.tunnels, &mut commands)?;
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(command: Command) -> Vec<String> {
        command.into_tokens()
    }

    #[test]
    fn test_interface_add_and_remove() {
        let add = Change::Add(Interface::parse("svc0", &["fc75::1"]).unwrap());
        assert_eq!(tokens(add.command().unwrap()), vec!["dummy", "svc0", "fc75::1"]);

        let remove: Change<Interface> = Change::Remove("svc0".to_string());
        assert_eq!(tokens(remove.command().unwrap()), vec!["rm", "dummy", "svc0"]);
    }

    #[test]
    fn test_interface_keeps_address_order() {
        let add = Change::Add(Interface::parse("svc0", &["10.1.0.1", "fc75::1"]).unwrap());
        assert_eq!(
            add.command().unwrap().to_string(),
            "dummy svc0 10.1.0.1 fc75::1"
        );
    }

    #[test]
    fn test_natfan_add() {
        let add = Change::Add(NatFan::parse("web", "fc75::80", &["fc75::81", "fc75::82"]).unwrap());
        assert_eq!(
            tokens(add.command().unwrap()),
            vec!["natfan", "web", "fc75::80/128", "fc75::81", "fc75::82"]
        );
        let remove: Change<NatFan> = Change::Remove("web".to_string());
        assert_eq!(tokens(remove.command().unwrap()), vec!["rm", "natfan", "web"]);
    }

    #[test]
    fn test_tunnel_add() {
        let tunnel = Tunnel::parse("t0", "10.0.0.1", "10.0.0.2", "fc75::a", "fc76::/48").unwrap();
        assert_eq!(
            tokens(Change::Add(tunnel).command().unwrap()),
            vec!["tunnel", "t0", "10.0.0.1", "10.0.0.2", "fc75::a", "fc76::/48"]
        );
    }

    #[test]
    fn test_missing_fields_fail() {
        let iface = Interface {
            name: "svc0".to_string(),
            addrs: vec![],
        };
        assert_eq!(
            Change::Add(iface).command(),
            Err(TranslateError::MissingField {
                kind: "interface",
                key: "svc0".to_string(),
                field: "addresses",
            })
        );

        let fan = NatFan::parse("web", "fc75::80", &[]).unwrap();
        assert!(matches!(
            Change::Add(fan).command(),
            Err(TranslateError::MissingField { .. })
        ));
    }

    #[test]
    fn test_bad_remove_key_fails() {
        let remove: Change<Tunnel> = Change::Remove("t0; reboot".to_string());
        assert!(matches!(remove.command(), Err(TranslateError::InvalidKey { .. })));
    }

    #[test]
    fn test_translate_diff_orders_by_category() {
        let diff = Diff {
            tunnels: vec![Change::Remove("t0".to_string())],
            natfans: vec![Change::Remove("web".to_string())],
            interfaces: vec![
                Change::Remove("svc0".to_string()),
                Change::Add(Interface::parse("svc1", &["fc75::2"]).unwrap()),
            ],
            dns: vec![Change::Remove("foo.bar".to_string())],
        };
        let lines: Vec<String> = translate_diff(&diff)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            lines,
            vec![
                "rm dummy svc0",
                "dummy svc1 fc75::2",
                "rm natfan web",
                "rm tunnel t0",
            ]
        );
    }

    #[test]
    fn test_translate_diff_is_all_or_nothing() {
        let diff = Diff {
            interfaces: vec![Change::Add(Interface::parse("svc1", &["fc75::2"]).unwrap())],
            natfans: vec![Change::Add(NatFan::parse("web", "fc75::80", &[]).unwrap())],
            ..Default::default()
        };
        assert!(translate_diff(&diff).is_err());
    }
}
