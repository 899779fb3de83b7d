// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scripted console for testing.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dormant_console::{ConsoleError, PacketError};

use super::{ConsoleConnector, ConsoleSession, STOP_COMMAND};
use crate::platform::{CallLog, RecordedCall};

/// Response to a scripted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Respond with this text
    Text(String),
    /// Fail as if the round trip timed out; the connection stays usable
    Timeout,
    /// Drop the connection
    Disconnect,
}

impl ScriptedReply {
    /// Occupancy reply in the usual server format.
    pub fn players(online: u32) -> Self {
        ScriptedReply::Text(format!(
            "There are {} of a max of 20 players online: ",
            online
        ))
    }
}

/// What the server does when it receives the stop command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopBehavior {
    /// Acknowledge and keep the connection open
    Reply(String),
    /// Drop the connection while shutting down
    Disconnect,
}

#[derive(Debug)]
struct MockConsoleState {
    replies: VecDeque<ScriptedReply>,
    default_reply: ScriptedReply,
    stop: StopBehavior,
    failing_connects: u32,
    opened: u32,
    closed: u32,
}

/// Scripted console server.
///
/// Replies to non-stop commands are taken from a queue; once it is empty the
/// default reply is used. All console traffic is recorded in the shared
/// [`CallLog`].
#[derive(Clone)]
pub struct MockConsole {
    state: Arc<Mutex<MockConsoleState>>,
    log: CallLog,
}

impl MockConsole {
    /// Console with an empty server that acknowledges stop.
    pub fn new(log: CallLog) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockConsoleState {
                replies: VecDeque::new(),
                default_reply: ScriptedReply::players(0),
                stop: StopBehavior::Reply("Stopping the server".to_string()),
                failing_connects: 0,
                opened: 0,
                closed: 0,
            })),
            log,
        }
    }

    /// Queue replies for upcoming commands.
    pub fn with_replies(self, replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        self.with_state(|state| state.replies.extend(replies));
        self
    }

    /// Reply used once the queue is exhausted.
    pub fn with_default_reply(self, reply: ScriptedReply) -> Self {
        self.with_state(|state| state.default_reply = reply);
        self
    }

    /// Behaviour on the stop command.
    pub fn with_stop_behavior(self, stop: StopBehavior) -> Self {
        self.with_state(|state| state.stop = stop);
        self
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_connects(self, count: u32) -> Self {
        self.with_state(|state| state.failing_connects = count);
        self
    }

    /// Queue another reply.
    pub fn push_reply(&self, reply: ScriptedReply) {
        self.with_state(|state| state.replies.push_back(reply));
    }

    /// Sessions opened so far.
    pub fn opened(&self) -> u32 {
        self.with_state(|state| state.opened)
    }

    /// Sessions closed so far.
    pub fn closed(&self) -> u32 {
        self.with_state(|state| state.closed)
    }

    /// Commands sent, in order.
    pub fn commands(&self) -> Vec<String> {
        self.log
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::ConsoleCommand(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockConsoleState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait]
impl ConsoleConnector for MockConsole {
    async fn connect(&self, host: IpAddr) -> Result<Box<dyn ConsoleSession>, ConsoleError> {
        self.log.record(RecordedCall::ConsoleConnect(host));
        let refused = self.with_state(|state| {
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                true
            } else {
                state.opened += 1;
                false
            }
        });
        if refused {
            return Err(ConsoleError::Connect(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(Box::new(MockSession {
            console: self.clone(),
            closed: false,
            lost: false,
        }))
    }
}

struct MockSession {
    console: MockConsole,
    closed: bool,
    lost: bool,
}

#[async_trait]
impl ConsoleSession for MockSession {
    async fn command(&mut self, command: &str) -> Result<String, ConsoleError> {
        if self.closed {
            return Err(ConsoleError::Closed);
        }
        if self.lost {
            return Err(ConsoleError::Packet(PacketError::ConnectionClosed));
        }
        self.console
            .log
            .record(RecordedCall::ConsoleCommand(command.to_string()));

        let reply = self.console.with_state(|state| {
            if command == STOP_COMMAND {
                match &state.stop {
                    StopBehavior::Reply(text) => ScriptedReply::Text(text.clone()),
                    StopBehavior::Disconnect => ScriptedReply::Disconnect,
                }
            } else {
                state
                    .replies
                    .pop_front()
                    .unwrap_or_else(|| state.default_reply.clone())
            }
        });

        match reply {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Timeout => Err(ConsoleError::Timeout(10_000)),
            ScriptedReply::Disconnect => {
                self.lost = true;
                Err(ConsoleError::Packet(PacketError::ConnectionClosed))
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.console.log.record(RecordedCall::ConsoleClose);
        self.console.with_state(|state| state.closed += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn host() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(3, 3, 3, 3))
    }

    #[tokio::test]
    async fn test_scripted_replies_then_default() {
        let console = MockConsole::new(CallLog::new())
            .with_replies([ScriptedReply::players(2), ScriptedReply::Timeout]);
        let mut session = console.connect(host()).await.unwrap();

        assert!(session.command("list").await.unwrap().contains("There are 2"));
        assert!(matches!(
            session.command("list").await,
            Err(ConsoleError::Timeout(_))
        ));
        assert!(session.command("list").await.unwrap().contains("There are 0"));
        assert_eq!(console.commands(), vec!["list", "list", "list"]);
    }

    #[tokio::test]
    async fn test_disconnect_is_sticky() {
        let console =
            MockConsole::new(CallLog::new()).with_replies([ScriptedReply::Disconnect]);
        let mut session = console.connect(host()).await.unwrap();

        let first = session.command("list").await.unwrap_err();
        assert!(first.is_connection_lost());
        let second = session.command("list").await.unwrap_err();
        assert!(second.is_connection_lost());
    }

    #[tokio::test]
    async fn test_stop_disconnect_and_close_counts() {
        let log = CallLog::new();
        let console =
            MockConsole::new(log.clone()).with_stop_behavior(StopBehavior::Disconnect);
        let mut session = console.connect(host()).await.unwrap();

        assert!(session.command("stop").await.unwrap_err().is_connection_lost());
        session.close().await;
        session.close().await;

        assert_eq!(console.opened(), 1);
        assert_eq!(console.closed(), 1);
        assert_eq!(log.count(|c| *c == RecordedCall::ConsoleClose), 1);
    }

    #[tokio::test]
    async fn test_failing_connects() {
        let console = MockConsole::new(CallLog::new()).fail_connects(1);
        assert!(console.connect(host()).await.is_err());
        assert!(console.connect(host()).await.is_ok());
        assert_eq!(console.opened(), 1);
    }
}
