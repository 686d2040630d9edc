//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

//! Confirmed-commit state machine (RFC 6241, section 8.4).
//!
//! A confirmed commit parks a rollback image of the pre-commit running
//! configuration behind a cancellable one-shot timer. The image is dropped
//! when the commit is confirmed, or promoted back to running when the timer
//! expires, the commit is cancelled, or (ephemeral mode) the originating
//! session goes away.

use std::time::Duration;

use bitflags::bitflags;
use lattice_northbound::rpc_error::{ErrorType, RpcError};
use lattice_utils::task::TimeoutTask;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, error};
use yang3::data::DataTree;

// Default confirm timeout (RFC 6241).
pub const DEFAULT_TIMEOUT: u32 = 600;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum State {
    #[default]
    Inactive,
    Ephemeral,
    Persistent,
    Rollback,
}

bitflags! {
    // Partial-failure flags reported when a rollback goes wrong.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RollbackFlags: u8 {
        const NOT_APPLIED = 0x01;
        const DB_NOT_DELETED = 0x02;
        const FAILSAFE_APPLIED = 0x04;
    }
}

#[derive(Debug)]
pub struct ConfirmedCommit {
    // Channels used to send and receive timeout notifications.
    tx: Sender<()>,
    pub rx: Receiver<()>,

    state: State,
    // Session that issued the confirmed commit (ephemeral mode).
    session_id: Option<u32>,
    // Identifier bound by `commit confirmed persist=<id>`.
    persist_id: Option<String>,
    // Pre-commit snapshot of running, plus the running timer.
    rollback: Option<Rollback>,
}

#[derive(Debug)]
pub struct Rollback {
    pub configuration: DataTree<'static>,
    _timeout: TimeoutTask,
}

// ===== impl ConfirmedCommit =====

impl Default for ConfirmedCommit {
    fn default() -> ConfirmedCommit {
        let (tx, rx) = mpsc::channel(4);

        ConfirmedCommit {
            tx,
            rx,
            state: State::default(),
            session_id: None,
            persist_id: None,
            rollback: None,
        }
    }
}

impl ConfirmedCommit {
    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Ephemeral | State::Persistent)
    }

    // Starts a confirmed commit, or extends a pending one.
    //
    // On extension the timer is reset and the original rollback image is
    // preserved; the first snapshot is the one running must return to if
    // the whole exchange is never confirmed.
    pub fn start(
        &mut self,
        configuration: DataTree<'static>,
        timeout: Option<u32>,
        session_id: u32,
        persist: Option<String>,
    ) {
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        debug!(%timeout, "starting confirmed commit timeout");

        let timeout = self.timeout_task(timeout);
        match self.rollback.take() {
            Some(rollback) => {
                // Extension: keep the original image, re-arm the timer.
                self.rollback = Some(Rollback {
                    configuration: rollback.configuration,
                    _timeout: timeout,
                });
            }
            None => {
                self.rollback = Some(Rollback {
                    configuration,
                    _timeout: timeout,
                });
                self.session_id = Some(session_id);
            }
        }

        match persist {
            Some(persist_id) => {
                self.persist_id = Some(persist_id);
                self.state = State::Persistent;
            }
            None if self.state != State::Persistent => {
                self.state = State::Ephemeral;
            }
            None => (),
        }
    }

    // Checks whether the given session may finalize or cancel the pending
    // confirmed commit.
    pub fn authorize(
        &self,
        session_id: u32,
        persist_id: Option<&str>,
    ) -> Result<(), RpcError> {
        match self.state {
            State::Persistent => {
                if persist_id == self.persist_id.as_deref() {
                    Ok(())
                } else {
                    Err(RpcError::invalid_value(
                        ErrorType::Protocol,
                        "persist-id does not match the pending confirmed \
                         commit",
                    ))
                }
            }
            State::Ephemeral => {
                if persist_id.is_some() {
                    Err(RpcError::invalid_value(
                        ErrorType::Protocol,
                        "no persistent confirmed commit is pending",
                    ))
                } else if self.session_id == Some(session_id) {
                    Ok(())
                } else {
                    Err(RpcError::operation_failed(
                        ErrorType::Protocol,
                        "a confirmed commit by another session is pending",
                    ))
                }
            }
            State::Inactive | State::Rollback => Ok(()),
        }
    }

    // Finalizes the pending confirmed commit, discarding the rollback image
    // and cancelling the timer. Returns whether a commit was pending.
    pub fn confirm(&mut self) -> bool {
        let was_active = self.is_active();
        if was_active {
            debug!("commit confirmation accepted");
        }
        self.reset();
        was_active
    }

    // Takes the rollback image out for promotion back to running, moving
    // to the ROLLBACK state.
    pub fn take_rollback(&mut self) -> Option<DataTree<'static>> {
        let rollback = self.rollback.take()?;
        self.state = State::Rollback;
        Some(rollback.configuration)
    }

    // The rollback image has been promoted back to running.
    pub fn finish_rollback(&mut self) {
        self.reset();
    }

    // The rollback could not be applied; reset anyway and report the
    // partial-failure flags.
    pub fn fail_rollback(&mut self, flags: RollbackFlags) {
        error!(?flags, "confirmed commit rollback failed");
        self.reset();
    }

    // Handles the death of a session: an unconfirmed ephemeral commit from
    // that session triggers an automatic rollback.
    pub fn session_closed(
        &mut self,
        session_id: u32,
    ) -> Option<DataTree<'static>> {
        if self.state == State::Ephemeral
            && self.session_id == Some(session_id)
        {
            return self.take_rollback();
        }
        None
    }

    fn reset(&mut self) {
        self.state = State::Inactive;
        self.session_id = None;
        self.persist_id = None;
        self.rollback = None;
    }

    fn timeout_task(&self, timeout: u32) -> TimeoutTask {
        let tx = self.tx.clone();
        let timeout = Duration::from_secs(timeout as u64);
        TimeoutTask::new(timeout, move || async move {
            let _ = tx.send(()).await;
        })
    }
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::northbound::tests::{context_init, parse_config};

    fn image() -> DataTree<'static> {
        context_init();
        parse_config(concat!(
            "<system xmlns=\"urn:lattice:system\">",
            "<hostname>before</hostname>",
            "</system>"
        ))
    }

    #[tokio::test]
    async fn ephemeral_lifecycle() {
        let mut cc = ConfirmedCommit::default();
        assert_eq!(cc.state(), State::Inactive);

        cc.start(image(), Some(60), 1, None);
        assert_eq!(cc.state(), State::Ephemeral);

        // Only the originating session may finalize.
        assert!(cc.authorize(2, None).is_err());
        assert!(cc.authorize(1, None).is_ok());

        assert!(cc.confirm());
        assert_eq!(cc.state(), State::Inactive);
        assert!(cc.take_rollback().is_none());
    }

    #[tokio::test]
    async fn persistent_takeover_requires_matching_id() {
        let mut cc = ConfirmedCommit::default();
        cc.start(image(), Some(60), 1, Some("abc".to_owned()));
        assert_eq!(cc.state(), State::Persistent);

        // Any session presenting the matching persist-id is accepted.
        assert!(cc.authorize(2, Some("abc")).is_ok());
        assert!(cc.authorize(2, Some("xyz")).is_err());
        assert!(cc.authorize(1, None).is_err());
    }

    #[tokio::test]
    async fn extension_preserves_the_original_image() {
        let mut cc = ConfirmedCommit::default();
        cc.start(image(), Some(60), 1, None);

        let replacement = {
            context_init();
            parse_config(concat!(
                "<system xmlns=\"urn:lattice:system\">",
                "<hostname>later</hostname>",
                "</system>"
            ))
        };
        cc.start(replacement, Some(120), 1, None);

        let rollback = cc.take_rollback().unwrap();
        let hostname = {
            use yang3::data::Data;
            rollback
                .find_path("/lattice-system:system/hostname")
                .unwrap()
                .value_canonical()
                .unwrap()
        };
        assert_eq!(hostname, "before");
        assert_eq!(cc.state(), State::Rollback);
        cc.finish_rollback();
        assert_eq!(cc.state(), State::Inactive);
    }

    #[tokio::test]
    async fn timer_expiry_notifies_the_event_loop() {
        let mut cc = ConfirmedCommit::default();
        cc.start(image(), Some(1), 1, None);

        tokio::time::timeout(Duration::from_secs(5), cc.rx.recv())
            .await
            .expect("confirmed commit timer never fired")
            .expect("timeout channel closed");
        assert!(cc.take_rollback().is_some());
    }

    #[tokio::test]
    async fn ephemeral_session_death_triggers_rollback() {
        let mut cc = ConfirmedCommit::default();
        cc.start(image(), Some(60), 7, None);

        assert!(cc.session_closed(3).is_none());
        assert!(cc.session_closed(7).is_some());
        assert_eq!(cc.state(), State::Rollback);
    }
}
