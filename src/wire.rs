//! Textual wire format of the ring protocol.
//!
//! One UTF-8 command per datagram, whitespace-delimited, no length prefix:
//!
//! ```text
//! FIND_SUCCESSOR <id>
//! SUCCESSOR <ip> <port> <id>
//! NOTIFY <id>
//! GET_PREDECESSOR
//! PREDECESSOR NONE | PREDECESSOR <ip> <port> <id>
//! GET_SUCCESSOR_LIST
//! SUCCESSOR_LIST (<ip> <port> <id>)*
//! UPDATE_PREDECESSOR_TO <ip> <port> <id>
//! UPDATE_SUCCESSOR_TO <ip> <port> <id>
//! UPDATE_FINGER <ip> <port> <id> <index>
//! STORE <key> <value>
//! REPLICATE <key> <value>
//! LOOKUP <key>
//! RESULT <key> <value>
//! PING / PONG
//! ```
//!
//! Keys are single whitespace-free tokens; a value consumes the remainder
//! of the datagram.

use std::fmt::Write as _;

use crate::node::peer::Peer;
use crate::utils::types::Id;
use crate::{Error, Result};

/// Tagged form of every protocol message, so dispatch is exhaustive and
/// malformed input is rejected in one place.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    FindSuccessor { id: Id },
    Successor { peer: Peer },
    Notify { id: Id },
    GetPredecessor,
    Predecessor { peer: Option<Peer> },
    GetSuccessorList,
    SuccessorList { peers: Vec<Peer> },
    UpdatePredecessorTo { peer: Peer },
    UpdateSuccessorTo { peer: Peer },
    UpdateFinger { peer: Peer, index: usize },
    Store { key: String, value: String },
    Replicate { key: String, value: String },
    Lookup { key: String },
    LookupResult { key: String, value: String },
    Ping,
    Pong,
}

impl Message {
    /// The wire command token.
    pub fn command(&self) -> &'static str {
        match self {
            Message::FindSuccessor { .. } => "FIND_SUCCESSOR",
            Message::Successor { .. } => "SUCCESSOR",
            Message::Notify { .. } => "NOTIFY",
            Message::GetPredecessor => "GET_PREDECESSOR",
            Message::Predecessor { .. } => "PREDECESSOR",
            Message::GetSuccessorList => "GET_SUCCESSOR_LIST",
            Message::SuccessorList { .. } => "SUCCESSOR_LIST",
            Message::UpdatePredecessorTo { .. } => "UPDATE_PREDECESSOR_TO",
            Message::UpdateSuccessorTo { .. } => "UPDATE_SUCCESSOR_TO",
            Message::UpdateFinger { .. } => "UPDATE_FINGER",
            Message::Store { .. } => "STORE",
            Message::Replicate { .. } => "REPLICATE",
            Message::Lookup { .. } => "LOOKUP",
            Message::LookupResult { .. } => "RESULT",
            Message::Ping => "PING",
            Message::Pong => "PONG",
        }
    }

    pub fn encode(&self) -> String {
        let mut line = String::from(self.command());
        match self {
            Message::FindSuccessor { id } | Message::Notify { id } => {
                let _ = write!(line, " {id}");
            }
            Message::Successor { peer }
            | Message::UpdatePredecessorTo { peer }
            | Message::UpdateSuccessorTo { peer } => push_peer(&mut line, peer),
            Message::Predecessor { peer: None } => line.push_str(" NONE"),
            Message::Predecessor { peer: Some(peer) } => push_peer(&mut line, peer),
            Message::SuccessorList { peers } => {
                for peer in peers {
                    push_peer(&mut line, peer);
                }
            }
            Message::UpdateFinger { peer, index } => {
                push_peer(&mut line, peer);
                let _ = write!(line, " {index}");
            }
            Message::Store { key, value }
            | Message::Replicate { key, value }
            | Message::LookupResult { key, value } => {
                let _ = write!(line, " {key} {value}");
            }
            Message::Lookup { key } => {
                let _ = write!(line, " {key}");
            }
            Message::GetPredecessor
            | Message::GetSuccessorList
            | Message::Ping
            | Message::Pong => {}
        }
        line
    }

    pub fn decode(line: &str) -> Result<Message> {
        let mut tokens = line.split_whitespace();
        let command = tokens.next().ok_or(Error::EmptyDatagram)?;

        match command {
            "FIND_SUCCESSOR" => Ok(Message::FindSuccessor {
                id: parse_id(tokens.next(), "FIND_SUCCESSOR")?,
            }),
            "SUCCESSOR" => Ok(Message::Successor {
                peer: parse_peer(&mut tokens, "SUCCESSOR")?,
            }),
            "NOTIFY" => Ok(Message::Notify {
                id: parse_id(tokens.next(), "NOTIFY")?,
            }),
            "GET_PREDECESSOR" => Ok(Message::GetPredecessor),
            "PREDECESSOR" => {
                let peeked = tokens.clone().next();
                if peeked == Some("NONE") {
                    Ok(Message::Predecessor { peer: None })
                } else {
                    Ok(Message::Predecessor {
                        peer: Some(parse_peer(&mut tokens, "PREDECESSOR")?),
                    })
                }
            }
            "GET_SUCCESSOR_LIST" => Ok(Message::GetSuccessorList),
            "SUCCESSOR_LIST" => {
                let mut peers = Vec::new();
                while tokens.clone().next().is_some() {
                    peers.push(parse_peer(&mut tokens, "SUCCESSOR_LIST")?);
                }
                Ok(Message::SuccessorList { peers })
            }
            "UPDATE_PREDECESSOR_TO" => Ok(Message::UpdatePredecessorTo {
                peer: parse_peer(&mut tokens, "UPDATE_PREDECESSOR_TO")?,
            }),
            "UPDATE_SUCCESSOR_TO" => Ok(Message::UpdateSuccessorTo {
                peer: parse_peer(&mut tokens, "UPDATE_SUCCESSOR_TO")?,
            }),
            "UPDATE_FINGER" => {
                let peer = parse_peer(&mut tokens, "UPDATE_FINGER")?;
                let index = tokens
                    .next()
                    .and_then(|raw| raw.parse().ok())
                    .ok_or(Error::Malformed {
                        command: "UPDATE_FINGER",
                        reason: "missing or non-numeric finger index",
                    })?;
                Ok(Message::UpdateFinger { peer, index })
            }
            "STORE" => parse_key_value(&mut tokens, "STORE")
                .map(|(key, value)| Message::Store { key, value }),
            "REPLICATE" => parse_key_value(&mut tokens, "REPLICATE")
                .map(|(key, value)| Message::Replicate { key, value }),
            "LOOKUP" => Ok(Message::Lookup {
                key: tokens
                    .next()
                    .ok_or(Error::Malformed {
                        command: "LOOKUP",
                        reason: "missing key",
                    })?
                    .to_string(),
            }),
            "RESULT" => parse_key_value(&mut tokens, "RESULT")
                .map(|(key, value)| Message::LookupResult { key, value }),
            "PING" => Ok(Message::Ping),
            "PONG" => Ok(Message::Pong),
            other => Err(Error::UnknownCommand(other.to_string())),
        }
    }
}

fn push_peer(line: &mut String, peer: &Peer) {
    let _ = write!(line, " {} {} {}", peer.address, peer.port, peer.id);
}

fn parse_id(token: Option<&str>, command: &'static str) -> Result<Id> {
    token
        .and_then(|raw| raw.parse().ok())
        .ok_or(Error::Malformed {
            command,
            reason: "missing or non-numeric identifier",
        })
}

fn parse_peer<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    command: &'static str,
) -> Result<Peer> {
    let address = tokens
        .next()
        .and_then(|raw| raw.parse().ok())
        .ok_or(Error::Malformed {
            command,
            reason: "missing or invalid peer address",
        })?;
    let port = tokens
        .next()
        .and_then(|raw| raw.parse().ok())
        .ok_or(Error::Malformed {
            command,
            reason: "missing or invalid peer port",
        })?;
    let id = parse_id(tokens.next(), command)?;
    Ok(Peer::new(address, port, id))
}

fn parse_key_value<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    command: &'static str,
) -> Result<(String, String)> {
    let key = tokens
        .next()
        .ok_or(Error::Malformed {
            command,
            reason: "missing key",
        })?
        .to_string();
    // The value is the remainder of the datagram.
    let value = tokens.collect::<Vec<_>>().join(" ");
    if value.is_empty() {
        return Err(Error::Malformed {
            command,
            reason: "missing value",
        });
    }
    Ok((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn peer(port: u16, id: Id) -> Peer {
        Peer::new(IpAddr::from([127, 0, 0, 1]), port, id)
    }

    #[test]
    fn test_decode_find_successor() {
        assert_eq!(
            Message::decode("FIND_SUCCESSOR 42").unwrap(),
            Message::FindSuccessor { id: 42 }
        );
        assert!(Message::decode("FIND_SUCCESSOR").is_err());
        assert!(Message::decode("FIND_SUCCESSOR abc").is_err());
    }

    #[test]
    fn test_decode_successor_reply() {
        assert_eq!(
            Message::decode("SUCCESSOR 127.0.0.1 5001 17").unwrap(),
            Message::Successor {
                peer: peer(5001, 17)
            }
        );
        assert!(Message::decode("SUCCESSOR 127.0.0.1 5001").is_err());
    }

    #[test]
    fn test_predecessor_none_round_trip() {
        let none = Message::Predecessor { peer: None };
        assert_eq!(none.encode(), "PREDECESSOR NONE");
        assert_eq!(Message::decode("PREDECESSOR NONE").unwrap(), none);

        let some = Message::Predecessor {
            peer: Some(peer(5000, 9)),
        };
        assert_eq!(Message::decode(&some.encode()).unwrap(), some);
    }

    #[test]
    fn test_successor_list_groups_of_three() {
        let message = Message::SuccessorList {
            peers: vec![peer(5001, 17), peer(5002, 90)],
        };
        assert_eq!(message.encode(), "SUCCESSOR_LIST 127.0.0.1 5001 17 127.0.0.1 5002 90");
        assert_eq!(Message::decode(&message.encode()).unwrap(), message);

        // An empty list is a valid reply from a lonely successor.
        assert_eq!(
            Message::decode("SUCCESSOR_LIST").unwrap(),
            Message::SuccessorList { peers: vec![] }
        );
        // A trailing partial triple is malformed.
        assert!(Message::decode("SUCCESSOR_LIST 127.0.0.1 5001").is_err());
    }

    #[test]
    fn test_store_value_takes_the_remainder() {
        match Message::decode("STORE motd hello there ring").unwrap() {
            Message::Store { key, value } => {
                assert_eq!(key, "motd");
                assert_eq!(value, "hello there ring");
            }
            other => panic!("decoded {other:?}"),
        }
        assert!(Message::decode("STORE motd").is_err());
    }

    #[test]
    fn test_update_finger_carries_index() {
        let message = Message::UpdateFinger {
            peer: peer(5003, 4),
            index: 6,
        };
        assert_eq!(message.encode(), "UPDATE_FINGER 127.0.0.1 5003 4 6");
        assert_eq!(Message::decode(&message.encode()).unwrap(), message);
        assert!(Message::decode("UPDATE_FINGER 127.0.0.1 5003 4").is_err());
    }

    #[test]
    fn test_health_probes() {
        assert_eq!(Message::decode("PING").unwrap(), Message::Ping);
        assert_eq!(Message::decode("PONG").unwrap(), Message::Pong);
        assert_eq!(Message::Ping.encode(), "PING");
    }

    #[test]
    fn test_rejects_junk() {
        assert!(matches!(Message::decode(""), Err(Error::EmptyDatagram)));
        assert!(matches!(
            Message::decode("WHATEVER 1 2 3"),
            Err(Error::UnknownCommand(_))
        ));
    }
}
