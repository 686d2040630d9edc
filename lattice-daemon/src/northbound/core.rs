//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use derive_new::new;
use lattice_northbound as northbound;
use lattice_northbound::configuration::{CommitPhase, ConfigChange};
use lattice_northbound::rpc_error::{
    ErrorInfo, ErrorTag, ErrorType, RpcError,
};
use lattice_northbound::{
    CallbackKey, NbDaemonSender, NbProviderReceiver, NbProviderSender,
    api as papi,
};
use lattice_utils::Database;
use lattice_utils::task::Task;
use lattice_yang::YANG_CTX;
use pickledb::PickleDb;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Receiver;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};
use yang3::data::{
    Data, DataDiffFlags, DataFormat, DataParserFlags, DataTree,
    DataValidationFlags,
};

use crate::config::{Config, NacmMode, StartupMode};
use crate::northbound::client::api::{
    self as capi, Operation, TestOption,
};
use crate::northbound::client::netconf;
use crate::northbound::confirmed::{ConfirmedCommit, RollbackFlags};
use crate::northbound::datastore::{
    self, DatastoreId, Datastores, EditOperation,
};
use crate::northbound::error::{Error, Result};
use crate::northbound::nacm::{AccessRights, Nacm};
use crate::northbound::session::{SessionTable, UnlockError};
use crate::northbound::{db, validation, yang};

pub struct Northbound {
    // Named configuration datastores.
    datastores: Datastores,
    // Non-volatile storage (transaction log).
    db: Database,
    // Callback keys from the data providers.
    callbacks: BTreeMap<CallbackKey, NbDaemonSender>,
    // List of management interfaces.
    #[allow(dead_code)]
    clients: Vec<Task<()>>,
    // List of data providers, in registration order.
    providers: Vec<NbDaemonSender>,
    // Channel used to receive messages from the external clients.
    rx_clients: Receiver<capi::client::Request>,
    // Channel used to receive messages from the data providers.
    rx_providers: NbProviderReceiver,
    // Keeps the provider channel open while no provider is registered.
    _tx_providers: NbProviderSender,
    // Management sessions and datastore locks.
    sessions: SessionTable,
    // Access control ruleset.
    nacm: Nacm,
    nacm_mode: NacmMode,
    // Confirmed commit information.
    confirmed_commit: ConfirmedCommit,
    // Default confirmed-commit timeout, in seconds.
    default_confirm_timeout: u32,
    // Per-request deadline (`None` disables it).
    rpc_timeout: Option<std::time::Duration>,
    // Outcome of the startup datastore processing.
    startup_status: StartupStatus,
}

// Outcome of the startup configuration processing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StartupStatus {
    Ok,
    // The startup configuration failed validation; failsafe was applied.
    Invalid,
    // The startup configuration could not be parsed; failsafe was applied.
    Err,
}

// Parameters of a `commit confirmed`.
#[derive(Debug)]
struct ConfirmedRequest {
    timeout: Option<u32>,
    session_id: u32,
    persist: Option<String>,
}

#[derive(Debug, new)]
#[derive(Deserialize, Serialize)]
pub struct Transaction {
    // Unique identifier for the transaction.
    #[new(default)]
    pub id: u32,

    // Date and time for when the transaction occurred.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date: DateTime<Utc>,

    // Optional comment for the transaction.
    pub comment: String,

    // Configuration that was committed.
    #[serde(with = "lattice_yang::serde::data_tree")]
    pub configuration: DataTree<'static>,
}

// ===== impl Northbound =====

impl Northbound {
    pub async fn init(config: &Config, db: PickleDb) -> Result<Northbound> {
        let db = Arc::new(Mutex::new(db));

        // Create global YANG context.
        yang::create_context(config);

        // Initialize the datastores from the configured directory.
        let mut datastores = Datastores::new(
            &config.datastore.dir,
            config.datastore.file_format(),
            config.datastore.cache,
        )?;
        datastores.set_pretty(config.datastore.pretty);

        // Start client tasks (NETCONF transport).
        let (rx_clients, clients) = start_clients(config);

        // Start provider tasks.
        let (tx_providers, rx_providers, providers) = start_providers(config);

        // Load callback keys from the data providers.
        let callbacks = load_callbacks(&providers).await;

        let mut nb = Northbound {
            datastores,
            db,
            callbacks,
            clients,
            providers,
            rx_clients,
            rx_providers,
            _tx_providers: tx_providers,
            sessions: SessionTable::default(),
            nacm: Nacm::default(),
            nacm_mode: config.nacm.mode,
            confirmed_commit: ConfirmedCommit::default(),
            default_confirm_timeout: config.confirmed_commit.default_timeout,
            rpc_timeout: (config.rpc_timeout > 0).then(|| {
                std::time::Duration::from_secs(config.rpc_timeout as u64)
            }),
            startup_status: StartupStatus::Ok,
        };

        // Process the startup configuration.
        nb.startup(config).await?;

        // Load the access-control ruleset. Internal mode reads the running
        // datastore populated by the startup processing.
        match config.nacm.mode {
            NacmMode::Disabled => (),
            NacmMode::Internal => {
                nb.nacm =
                    Nacm::from_config(nb.datastores.tree(DatastoreId::Running)?);
            }
            NacmMode::External => {
                if let Some(path) = &config.nacm.external_file {
                    nb.nacm = Nacm::from_file(path)?;
                } else {
                    warn!(
                        "external NACM mode configured without a ruleset file"
                    );
                }
            }
        }

        Ok(nb)
    }

    pub fn startup_status(&self) -> StartupStatus {
        self.startup_status
    }

    // Main event loop.
    #[instrument(skip_all, "northbound")]
    pub async fn run(mut self, mut signal_rx: Receiver<()>) {
        loop {
            tokio::select! {
                Some(request) = self.rx_clients.recv() => {
                    self.process_client_msg(request).await;
                }
                Some(notification) = self.rx_providers.recv() => {
                    self.process_provider_msg(notification);
                }
                Some(_) = self.confirmed_commit.rx.recv() => {
                    self.process_confirmed_commit_timeout().await;
                }
                _ = signal_rx.recv() => {
                    info!("shutting down");
                    self.rx_clients.close();
                    self.clients.clear();
                    self.providers.clear();
                    break;
                }
                else => break,
            }
        }
    }

    // Processes a message received from an external client.
    async fn process_client_msg(&mut self, request: capi::client::Request) {
        debug!(%request, "received client request");

        match request {
            capi::client::Request::Attach(request) => {
                let session_id = self.sessions.attach(
                    request.username,
                    request.groups,
                    request.recovery,
                    request.kill_tx,
                );
                let _ = request
                    .responder
                    .send(capi::client::AttachResponse { session_id });
            }
            capi::client::Request::Detach(request) => {
                self.detach_session(request.session_id).await;
            }
            capi::client::Request::Rpc(request) => {
                // An expired deadline aborts the handler at its next
                // suspension point.
                let deadline = self.rpc_timeout;
                let rpc =
                    self.process_rpc(request.session_id, request.operation);
                let response = match deadline {
                    Some(deadline) => {
                        match tokio::time::timeout(deadline, rpc).await {
                            Ok(response) => response,
                            Err(_) => Err(vec![RpcError::resource_denied(
                                ErrorType::Application,
                                "request deadline exceeded",
                            )]),
                        }
                    }
                    None => rpc.await,
                };
                if let Err(errors) = &response {
                    for error in errors {
                        warn!(%error, "request failed");
                    }
                }
                let _ = request.responder.send(response);
            }
        }
    }

    // Processes a notification received from a data provider.
    fn process_provider_msg(
        &mut self,
        notification: papi::provider::Notification,
    ) {
        // Relayed to clients once notification subscriptions land.
        debug!(data = ?notification.data, "provider notification");
    }

    // Processes a confirmed commit timeout.
    async fn process_confirmed_commit_timeout(&mut self) {
        info!("confirmed commit has timed out");

        if let Some(image) = self.confirmed_commit.take_rollback() {
            if let Err(errors) = self.rollback_transaction(image).await {
                for error in errors {
                    error!(%error, "failed to rollback to previous configuration");
                }
            }
        }
    }

    // Tears down a session, releasing its locks. An unconfirmed ephemeral
    // commit from the dying session is rolled back.
    async fn detach_session(&mut self, session_id: u32) {
        if let Some(session) = self.sessions.detach(session_id) {
            let _ = session.kill_tx.send(());
        }
        if let Some(image) = self.confirmed_commit.session_closed(session_id)
        {
            if let Err(errors) = self.rollback_transaction(image).await {
                for error in errors {
                    error!(%error, "failed to rollback to previous configuration");
                }
            }
        }
    }

    // Dispatches a NETCONF protocol operation.
    async fn process_rpc(
        &mut self,
        session_id: u32,
        operation: Operation,
    ) -> std::result::Result<capi::client::Reply, Vec<RpcError>> {
        let session = self.sessions.get(session_id).ok_or_else(|| {
            vec![RpcError::operation_failed(
                ErrorType::Protocol,
                "unknown session",
            )]
        })?;
        let username = session.username.clone();
        let recovery = session.recovery;

        // Access control for the operation itself. `close-session` is
        // never subject to access control.
        if !matches!(operation, Operation::CloseSession) {
            self.nacm
                .check_rpc(&username, recovery, operation.rpc_name())
                .map_err(|error| vec![error])?;
        }

        match operation {
            Operation::Get { filter } => {
                self.handle_get(&username, recovery, filter).await
            }
            Operation::GetConfig { source, filter } => {
                self.handle_get_config(&username, recovery, source, filter)
            }
            Operation::EditConfig {
                target,
                default_operation,
                test_option,
                config,
                ..
            } => self.handle_edit_config(
                session_id,
                &username,
                recovery,
                target,
                default_operation,
                test_option,
                &config,
            ),
            Operation::CopyConfig { source, target } => {
                self.handle_copy_config(
                    session_id, &username, recovery, source, target,
                )
                .await
            }
            Operation::DeleteConfig { target } => {
                self.handle_delete_config(
                    session_id, &username, recovery, target,
                )
            }
            Operation::Lock { target } => {
                self.handle_lock(session_id, target)
            }
            Operation::Unlock { target } => {
                self.handle_unlock(session_id, target)
            }
            Operation::Commit {
                confirmed,
                confirm_timeout,
                persist,
                persist_id,
            } => {
                self.handle_commit(
                    session_id,
                    confirmed,
                    confirm_timeout,
                    persist,
                    persist_id,
                )
                .await
            }
            Operation::CancelCommit { persist_id } => {
                self.handle_cancel_commit(session_id, persist_id).await
            }
            Operation::DiscardChanges => self.handle_discard_changes(),
            Operation::Validate { source } => {
                self.handle_validate(source).await
            }
            Operation::CloseSession => Ok(capi::client::Reply::Ok),
            Operation::KillSession { session_id: target } => {
                self.handle_kill_session(session_id, target).await
            }
        }
    }

    async fn handle_get(
        &mut self,
        username: &str,
        recovery: bool,
        filter: Option<String>,
    ) -> std::result::Result<capi::client::Reply, Vec<RpcError>> {
        let mut tree = self
            .datastores
            .get(DatastoreId::Running, filter.as_deref(), None)
            .map_err(map_datastore_error)?;

        // Merge dynamically generated state from the data providers.
        for provider_tx in self.providers.iter() {
            let (responder_tx, responder_rx) = oneshot::channel();
            let request =
                papi::daemon::Request::Get(papi::daemon::GetRequest {
                    path: filter.clone(),
                    responder: Some(responder_tx),
                });
            provider_tx.send(request).await.unwrap();
            let response = responder_rx.await.unwrap().map_err(|error| {
                vec![RpcError::operation_failed(
                    ErrorType::Application,
                    error.to_string(),
                )]
            })?;
            tree.merge(&response.data).map_err(|error| {
                Error::YangInternal(error).into_rpc_errors()
            })?;
        }

        let tree = self.nacm_read_filter(username, recovery, tree);
        Ok(capi::client::Reply::Data(tree))
    }

    fn handle_get_config(
        &mut self,
        username: &str,
        recovery: bool,
        source: DatastoreId,
        filter: Option<String>,
    ) -> std::result::Result<capi::client::Reply, Vec<RpcError>> {
        let tree = self
            .datastores
            .get(source, filter.as_deref(), None)
            .map_err(map_datastore_error)?;
        let tree = self.nacm_read_filter(username, recovery, tree);
        Ok(capi::client::Reply::Data(tree))
    }

    fn handle_edit_config(
        &mut self,
        session_id: u32,
        username: &str,
        recovery: bool,
        target: DatastoreId,
        default_operation: EditOperation,
        test_option: TestOption,
        config: &str,
    ) -> std::result::Result<capi::client::Reply, Vec<RpcError>> {
        if target != DatastoreId::Candidate {
            return Err(vec![RpcError::operation_not_supported(
                ErrorType::Protocol,
                "edit-config is only supported on the candidate datastore",
            )]);
        }
        if let Some(holder) = self.lock_conflict(target, session_id) {
            return Err(vec![holder]);
        }

        // Parse the supplied configuration. Unknown elements and type
        // violations are rejected here.
        let yang_ctx = YANG_CTX.get().unwrap();
        let config = DataTree::parse_string(
            yang_ctx,
            config,
            DataFormat::XML,
            DataParserFlags::NO_VALIDATION,
            DataValidationFlags::NO_STATE,
        )
        .map_err(|error| vec![validation::map_parse_error(&error)])?;

        // Write access on every touched subtree.
        for dnode in config
            .reference()
            .into_iter()
            .flat_map(|dnode| dnode.inclusive_siblings())
        {
            self.nacm
                .check_data(
                    username,
                    recovery,
                    AccessRights::WRITE,
                    &dnode.path(),
                )
                .map_err(|error| vec![error])?;
        }

        // Apply the edit to a scratch copy; the candidate is only replaced
        // on success, which is what rollback-on-error amounts to for a
        // single edit.
        let mut work = self
            .datastores
            .tree(DatastoreId::Candidate)
            .and_then(|tree| tree.duplicate().map_err(datastore::Error::Yang))
            .map_err(map_datastore_error)?;
        datastore::edit_tree(&mut work, &config, default_operation)
            .map_err(map_datastore_error)?;

        match test_option {
            TestOption::TestOnly => {
                validation::validate(&work)?;
            }
            TestOption::TestThenSet => {
                validation::validate(&work)?;
                self.commit_candidate(work)?;
            }
            TestOption::Set => {
                self.commit_candidate(work)?;
            }
        }

        Ok(capi::client::Reply::Ok)
    }

    fn commit_candidate(
        &mut self,
        work: DataTree<'static>,
    ) -> std::result::Result<(), Vec<RpcError>> {
        self.datastores
            .replace(DatastoreId::Candidate, work)
            .map_err(map_datastore_error)?;
        self.datastores.mark_dirty(DatastoreId::Candidate);
        Ok(())
    }

    async fn handle_copy_config(
        &mut self,
        session_id: u32,
        username: &str,
        recovery: bool,
        source: DatastoreId,
        target: DatastoreId,
    ) -> std::result::Result<capi::client::Reply, Vec<RpcError>> {
        if source == target {
            return Err(vec![RpcError::invalid_value(
                ErrorType::Protocol,
                "source and target identify the same datastore",
            )]);
        }
        if let Some(holder) = self.lock_conflict(target, session_id) {
            return Err(vec![holder]);
        }
        self.nacm
            .check_data(username, recovery, AccessRights::WRITE, "/")
            .map_err(|error| vec![error])?;

        // Copying into running is a full-replace commit.
        if target == DatastoreId::Running {
            let candidate = self
                .datastores
                .tree(source)
                .and_then(|tree| {
                    tree.duplicate().map_err(datastore::Error::Yang)
                })
                .map_err(map_datastore_error)?;
            self.create_transaction(
                candidate,
                format!("copy-config from {source}"),
                None,
            )
            .await
            .map_err(Error::into_rpc_errors)?;
            return Ok(capi::client::Reply::Ok);
        }

        self.datastores
            .copy(source, target)
            .map_err(map_datastore_error)?;
        if target == DatastoreId::Candidate && source != DatastoreId::Running
        {
            self.datastores.mark_dirty(DatastoreId::Candidate);
        }
        Ok(capi::client::Reply::Ok)
    }

    fn handle_delete_config(
        &mut self,
        session_id: u32,
        username: &str,
        recovery: bool,
        target: DatastoreId,
    ) -> std::result::Result<capi::client::Reply, Vec<RpcError>> {
        if matches!(target, DatastoreId::Running | DatastoreId::Candidate) {
            return Err(vec![RpcError::invalid_value(
                ErrorType::Protocol,
                format!("the {target} configuration can't be deleted"),
            )]);
        }
        if let Some(holder) = self.lock_conflict(target, session_id) {
            return Err(vec![holder]);
        }
        self.nacm
            .check_data(username, recovery, AccessRights::DELETE, "/")
            .map_err(|error| vec![error])?;

        match self.datastores.delete(target) {
            // Deleting an absent datastore is a no-op.
            Ok(()) | Err(datastore::Error::NotFound(_)) => {
                Ok(capi::client::Reply::Ok)
            }
            Err(error) => Err(map_datastore_error(error)),
        }
    }

    fn handle_lock(
        &mut self,
        session_id: u32,
        target: DatastoreId,
    ) -> std::result::Result<capi::client::Reply, Vec<RpcError>> {
        // A modified candidate can't be locked (RFC 6241, section 7.5).
        if target == DatastoreId::Candidate
            && self.datastores.is_dirty(target)
        {
            return Err(vec![
                RpcError::new(ErrorType::Protocol, ErrorTag::LockDenied)
                    .with_info(ErrorInfo::SessionId(0))
                    .with_message(
                        "the candidate configuration has uncommitted changes",
                    ),
            ]);
        }
        self.sessions
            .lock(target, session_id)
            .map_err(|holder| vec![RpcError::lock_denied(holder)])?;
        Ok(capi::client::Reply::Ok)
    }

    fn handle_unlock(
        &mut self,
        session_id: u32,
        target: DatastoreId,
    ) -> std::result::Result<capi::client::Reply, Vec<RpcError>> {
        self.sessions.unlock(target, session_id).map_err(|error| {
            vec![match error {
                UnlockError::NotLocked => RpcError::operation_failed(
                    ErrorType::Protocol,
                    "the lock is not active",
                ),
                UnlockError::HeldBy(holder) => RpcError::lock_denied(holder),
            }]
        })?;
        Ok(capi::client::Reply::Ok)
    }

    async fn handle_commit(
        &mut self,
        session_id: u32,
        confirmed: bool,
        confirm_timeout: Option<u32>,
        persist: Option<String>,
        persist_id: Option<String>,
    ) -> std::result::Result<capi::client::Reply, Vec<RpcError>> {
        // A pending confirmed commit restricts who may commit again.
        if self.confirmed_commit.is_active() {
            self.confirmed_commit
                .authorize(session_id, persist_id.as_deref())
                .map_err(|error| vec![error])?;
        }

        let candidate = self
            .datastores
            .tree(DatastoreId::Candidate)
            .and_then(|tree| tree.duplicate().map_err(datastore::Error::Yang))
            .map_err(map_datastore_error)?;

        let confirmed_request = confirmed.then(|| ConfirmedRequest {
            timeout: confirm_timeout,
            session_id,
            persist,
        });
        let finalize = !confirmed && self.confirmed_commit.is_active();

        self.create_transaction(
            candidate,
            String::new(),
            confirmed_request,
        )
        .await
        .map_err(Error::into_rpc_errors)?;

        // A plain commit also finalizes a pending confirmed commit.
        if finalize {
            self.confirmed_commit.confirm();
        }

        Ok(capi::client::Reply::Ok)
    }

    async fn handle_cancel_commit(
        &mut self,
        session_id: u32,
        persist_id: Option<String>,
    ) -> std::result::Result<capi::client::Reply, Vec<RpcError>> {
        if !self.confirmed_commit.is_active() {
            return Err(vec![RpcError::operation_failed(
                ErrorType::Protocol,
                "no confirmed commit is in progress",
            )]);
        }
        self.confirmed_commit
            .authorize(session_id, persist_id.as_deref())
            .map_err(|error| vec![error])?;

        let image = self
            .confirmed_commit
            .take_rollback()
            .expect("active confirmed commit without rollback image");
        self.rollback_transaction(image).await?;
        Ok(capi::client::Reply::Ok)
    }

    fn handle_discard_changes(
        &mut self,
    ) -> std::result::Result<capi::client::Reply, Vec<RpcError>> {
        // Resets candidate from running. A pending confirmed-commit
        // rollback image is deliberately left untouched.
        self.datastores
            .copy(DatastoreId::Running, DatastoreId::Candidate)
            .map_err(map_datastore_error)?;
        Ok(capi::client::Reply::Ok)
    }

    async fn handle_validate(
        &mut self,
        source: DatastoreId,
    ) -> std::result::Result<capi::client::Reply, Vec<RpcError>> {
        let tree = self
            .datastores
            .tree(source)
            .and_then(|tree| tree.duplicate().map_err(datastore::Error::Yang))
            .map_err(map_datastore_error)?;
        validation::validate(&tree)?;
        let candidate = Arc::new(tree);
        self.validate_notify(&candidate).await.map_err(|error| {
            vec![RpcError::operation_failed(
                ErrorType::Application,
                error.to_string(),
            )]
        })?;
        Ok(capi::client::Reply::Ok)
    }

    async fn handle_kill_session(
        &mut self,
        session_id: u32,
        target: u32,
    ) -> std::result::Result<capi::client::Reply, Vec<RpcError>> {
        if target == session_id {
            return Err(vec![RpcError::invalid_value(
                ErrorType::Protocol,
                "a session can't kill itself",
            )]);
        }
        if self.sessions.get(target).is_none() {
            return Err(vec![RpcError::invalid_value(
                ErrorType::Protocol,
                format!("unknown session-id {target}"),
            )]);
        }
        self.detach_session(target).await;
        Ok(capi::client::Reply::Ok)
    }

    // Prunes top-level subtrees the user isn't allowed to read.
    fn nacm_read_filter(
        &self,
        username: &str,
        recovery: bool,
        mut tree: DataTree<'static>,
    ) -> DataTree<'static> {
        let denied: Vec<String> = tree
            .reference()
            .into_iter()
            .flat_map(|dnode| dnode.inclusive_siblings())
            .filter(|dnode| {
                self.nacm
                    .check_data(
                        username,
                        recovery,
                        AccessRights::READ,
                        &dnode.path(),
                    )
                    .is_err()
            })
            .map(|dnode| dnode.path().to_owned())
            .collect();
        for path in denied {
            let _ = tree.remove(&path);
        }
        tree
    }

    // Reports a lock held by another session on the target datastore.
    fn lock_conflict(
        &self,
        target: DatastoreId,
        session_id: u32,
    ) -> Option<RpcError> {
        match self.sessions.lock_holder(target) {
            Some(holder) if holder != session_id => Some(
                RpcError::in_use(
                    ErrorType::Protocol,
                    format!("the {target} datastore is locked"),
                )
                .with_info(ErrorInfo::SessionId(holder)),
            ),
            _ => None,
        }
    }

    // Creates a configuration transaction using a two-phase commit
    // protocol. In case of success, the transaction ID is returned.
    //
    // A transaction fails if the candidate configuration fails validation,
    // or if a provider fails to prepare resources for the changes. An
    // aborted transaction leaves running untouched.
    async fn create_transaction(
        &mut self,
        candidate: DataTree<'static>,
        comment: String,
        confirmed: Option<ConfirmedRequest>,
    ) -> Result<u32> {
        let candidate = Arc::new(candidate);

        // Validate the candidate configuration.
        validation::validate(&candidate)
            .map_err(Error::TransactionValidation)?;
        self.validate_notify(&candidate).await.map_err(|error| {
            Error::TransactionValidation(vec![RpcError::operation_failed(
                ErrorType::Application,
                error.to_string(),
            )])
        })?;

        // Snapshot running and compute the diff against the candidate.
        let (diff, rollback_config) = {
            let running = self.datastores.tree(DatastoreId::Running)?;
            let diff = running
                .diff(&candidate, DataDiffFlags::DEFAULTS)
                .map_err(Error::YangInternal)?;
            let rollback_config =
                running.duplicate().map_err(Error::YangInternal)?;
            (diff, rollback_config)
        };

        // Check if the configuration has changed.
        if diff.iter().next().is_none() {
            if let Some(request) = confirmed {
                self.confirmed_commit.start(
                    rollback_config,
                    request.timeout.or(Some(self.default_confirm_timeout)),
                    request.session_id,
                    request.persist,
                );
            }
            return Ok(0);
        }

        // Get list of configuration changes.
        let changes = northbound::configuration::changes_from_diff(&diff);
        debug!(?changes, "configuration transaction");

        let old_config = Arc::new(rollback_config);

        // Phase 1: validate configuration and attempt to prepare resources
        // for the transaction.
        match self
            .commit_phase_notify(CommitPhase::Prepare, &old_config, &candidate, &changes)
            .await
        {
            Ok(_) => {
                // Phase 2: apply the configuration changes.
                let _ = self
                    .commit_phase_notify(
                        CommitPhase::Apply,
                        &old_config,
                        &candidate,
                        &changes,
                    )
                    .await;

                // Promote the candidate: running is swapped to the new
                // configuration and candidate is reset on top of it.
                let mut new_running =
                    (*candidate).duplicate().map_err(Error::YangInternal)?;
                new_running
                    .validate(DataValidationFlags::NO_STATE)
                    .map_err(Error::YangInternal)?;
                self.datastores.replace(DatastoreId::Running, new_running)?;
                self.datastores
                    .copy(DatastoreId::Running, DatastoreId::Candidate)?;

                // Post-commit callbacks, best-effort.
                let _ = self
                    .commit_phase_notify(
                        CommitPhase::Done,
                        &old_config,
                        &candidate,
                        &changes,
                    )
                    .await;

                // Publish the change on the internal event stream: the
                // access-control ruleset is the backend's own subscriber.
                if self.nacm_mode == NacmMode::Internal {
                    self.nacm = Nacm::from_config(
                        self.datastores.tree(DatastoreId::Running)?,
                    );
                }

                // Hand the rollback image to the confirmed-commit state
                // machine.
                if let Some(request) = confirmed {
                    let image = (*old_config)
                        .duplicate()
                        .map_err(Error::YangInternal)?;
                    self.confirmed_commit.start(
                        image,
                        request.timeout.or(Some(self.default_confirm_timeout)),
                        request.session_id,
                        request.persist,
                    );
                }

                // Record transaction.
                let candidate = Arc::try_unwrap(candidate).unwrap();
                let mut transaction =
                    Transaction::new(Utc::now(), comment, candidate);
                let mut db = self.db.lock().unwrap();
                db::transaction_record(&mut db, &mut transaction);

                Ok(transaction.id)
            }
            Err((failed, error)) => {
                // Phase 2: abort the configuration changes on every
                // provider whose preparation succeeded, in reverse
                // registration order.
                self.commit_phase_abort(
                    &old_config,
                    &candidate,
                    &changes,
                    failed,
                )
                .await;

                Err(Error::TransactionPreparation(error))
            }
        }
    }

    // Promotes a rollback image back to running through the regular
    // transaction path.
    async fn rollback_transaction(
        &mut self,
        image: DataTree<'static>,
    ) -> std::result::Result<(), Vec<RpcError>> {
        match self
            .create_transaction(
                image,
                "Confirmed commit rollback".to_owned(),
                None,
            )
            .await
        {
            Ok(_) => {
                self.confirmed_commit.finish_rollback();
                info!(
                    "Commit was not confirmed; automatic rollback complete."
                );
                Ok(())
            }
            Err(error) => {
                let mut flags = RollbackFlags::NOT_APPLIED;

                // Last resort: promote the known-good failsafe datastore.
                if self.datastores.exists(DatastoreId::Failsafe) {
                    let failsafe = self
                        .datastores
                        .tree(DatastoreId::Failsafe)
                        .and_then(|tree| {
                            tree.duplicate().map_err(datastore::Error::Yang)
                        })
                        .map_err(map_datastore_error);
                    if let Ok(failsafe) = failsafe {
                        if self
                            .create_transaction(
                                failsafe,
                                "failsafe".to_owned(),
                                None,
                            )
                            .await
                            .is_ok()
                        {
                            flags |= RollbackFlags::FAILSAFE_APPLIED;
                        }
                    }
                }

                self.confirmed_commit.fail_rollback(flags);
                Err(vec![RpcError::rollback_failed(
                    ErrorType::Application,
                    error.to_string(),
                )])
            }
        }
    }

    // Request all data providers to validate the candidate configuration.
    async fn validate_notify(
        &mut self,
        candidate: &Arc<DataTree<'static>>,
    ) -> std::result::Result<(), northbound::error::Error> {
        for provider_tx in self.providers.iter() {
            let (responder_tx, responder_rx) = oneshot::channel();
            let request = papi::daemon::Request::Validate(
                papi::daemon::ValidateRequest {
                    config: candidate.clone(),
                    responder: Some(responder_tx),
                },
            );
            provider_tx.send(request).await.unwrap();
            responder_rx.await.unwrap()?;
        }

        Ok(())
    }

    // Notifies the data providers of the configuration changes associated
    // to an on-going transaction, in registration order. On failure,
    // returns the index of the failing provider.
    async fn commit_phase_notify(
        &mut self,
        phase: CommitPhase,
        old_config: &Arc<DataTree<'static>>,
        new_config: &Arc<DataTree<'static>>,
        changes: &[ConfigChange],
    ) -> std::result::Result<(), (usize, northbound::error::Error)> {
        for (index, provider_tx) in self.providers.iter().enumerate() {
            let changes =
                provider_changes(&self.callbacks, provider_tx, changes);

            let (responder_tx, responder_rx) = oneshot::channel();
            let request =
                papi::daemon::Request::Commit(papi::daemon::CommitRequest {
                    phase,
                    old_config: old_config.clone(),
                    new_config: new_config.clone(),
                    changes,
                    responder: Some(responder_tx),
                });
            provider_tx.send(request).await.unwrap();
            if let Err(error) = responder_rx.await.unwrap() {
                return Err((index, error));
            }
        }

        Ok(())
    }

    // Aborts a failed transaction: every provider whose preparation
    // succeeded is notified in reverse registration order.
    async fn commit_phase_abort(
        &mut self,
        old_config: &Arc<DataTree<'static>>,
        new_config: &Arc<DataTree<'static>>,
        changes: &[ConfigChange],
        failed: usize,
    ) {
        for provider_tx in self.providers[..failed].iter().rev() {
            let changes =
                provider_changes(&self.callbacks, provider_tx, changes);

            let (responder_tx, responder_rx) = oneshot::channel();
            let request =
                papi::daemon::Request::Commit(papi::daemon::CommitRequest {
                    phase: CommitPhase::Abort,
                    old_config: old_config.clone(),
                    new_config: new_config.clone(),
                    changes,
                    responder: Some(responder_tx),
                });
            provider_tx.send(request).await.unwrap();
            let _ = responder_rx.await.unwrap();
        }
    }

    // Processes the startup configuration according to the configured
    // startup mode.
    async fn startup(&mut self, config: &Config) -> Result<()> {
        // Pick up persisted state, categorizing parse failures.
        let mut parse_failed = Vec::new();
        for id in
            [DatastoreId::Running, DatastoreId::Startup, DatastoreId::Failsafe]
        {
            match self.datastores.load(id) {
                Ok(_) => (),
                Err(datastore::Error::Yang(error)) => {
                    error!(datastore = %id, %error, "failed to parse persisted datastore");
                    parse_failed.push(id);
                }
                Err(error) => return Err(error.into()),
            }
        }

        let source = match config.startup_mode {
            StartupMode::Init => {
                // Running is wiped and re-created empty; no commit is run.
                let yang_ctx = YANG_CTX.get().unwrap();
                self.datastores
                    .replace(DatastoreId::Running, DataTree::new(yang_ctx))?;
                self.datastores
                    .copy(DatastoreId::Running, DatastoreId::Candidate)?;
                self.startup_status = StartupStatus::Ok;
                return Ok(());
            }
            StartupMode::None => {
                // Running as persisted; no validation or commit is run.
                self.datastores
                    .copy(DatastoreId::Running, DatastoreId::Candidate)?;
                self.startup_status = StartupStatus::Ok;
                return Ok(());
            }
            StartupMode::Running => DatastoreId::Running,
            StartupMode::Startup => DatastoreId::Startup,
        };

        if parse_failed.contains(&source) {
            self.startup_status = StartupStatus::Err;
            return self.startup_fallback().await;
        }

        // The persisted source becomes the startup candidate; running is
        // reset so the providers observe the full configuration as new.
        let yang_ctx = YANG_CTX.get().unwrap();
        let mut candidate = if self.datastores.exists(source) {
            self.datastores.tree(source)?.duplicate().map_err(Error::YangInternal)?
        } else {
            DataTree::new(yang_ctx)
        };

        // Merge extra startup configuration, if any.
        if let Some(path) = &config.extra_config {
            let data = std::fs::read_to_string(path)?;
            let extra = DataTree::parse_string(
                yang_ctx,
                &data,
                DataFormat::XML,
                DataParserFlags::NO_VALIDATION,
                DataValidationFlags::NO_STATE,
            )
            .map_err(Error::YangInternal)?;
            candidate.merge(&extra).map_err(Error::YangInternal)?;
        }

        self.datastores
            .replace(DatastoreId::Running, DataTree::new(yang_ctx))?;

        match self
            .create_transaction(candidate, "startup".to_owned(), None)
            .await
        {
            Ok(_) => {
                self.startup_status = StartupStatus::Ok;
                Ok(())
            }
            Err(Error::TransactionValidation(errors)) => {
                for error in &errors {
                    error!(%error, "invalid startup configuration");
                }
                self.startup_status = StartupStatus::Invalid;
                self.startup_fallback().await
            }
            Err(error) => Err(error),
        }
    }

    // Loads the failsafe datastore after the startup configuration turned
    // out to be unusable.
    async fn startup_fallback(&mut self) -> Result<()> {
        if !self.datastores.exists(DatastoreId::Failsafe) {
            warn!("no failsafe datastore provisioned; running stays empty");
            return Ok(());
        }

        info!("loading the failsafe datastore");
        let failsafe = self
            .datastores
            .tree(DatastoreId::Failsafe)?
            .duplicate()
            .map_err(Error::YangInternal)?;
        match self
            .create_transaction(failsafe, "failsafe".to_owned(), None)
            .await
        {
            Ok(_) => Ok(()),
            Err(error) => {
                error!(%error, "failed to apply the failsafe datastore");
                Err(error)
            }
        }
    }
}

// ===== helper functions =====

fn map_datastore_error(error: datastore::Error) -> Vec<RpcError> {
    Error::Datastore(error).into_rpc_errors()
}

// Batch the changes that should be sent to the given provider.
fn provider_changes(
    callbacks: &BTreeMap<CallbackKey, NbDaemonSender>,
    provider_tx: &NbDaemonSender,
    changes: &[ConfigChange],
) -> Vec<ConfigChange> {
    changes
        .iter()
        .filter(|(cb_key, _)| {
            callbacks
                .get(cb_key)
                .map(|tx| tx.same_channel(provider_tx))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

// Starts the external client interfaces.
fn start_clients(
    config: &Config,
) -> (Receiver<capi::client::Request>, Vec<Task<()>>) {
    let mut clients = Vec::new();
    let (client_tx, daemon_rx) = mpsc::channel(4);

    if config.listen.enabled {
        let client = netconf::start(&config.listen, config.nacm.credentials, client_tx);
        clients.push(client);
    }

    (daemon_rx, clients)
}

// Starts the data providers. Providers are compiled in; none are enabled
// by default.
fn start_providers(
    _config: &Config,
) -> (NbProviderSender, NbProviderReceiver, Vec<NbDaemonSender>) {
    let providers = Vec::new();
    let (provider_tx, provider_rx) = mpsc::unbounded_channel();

    (provider_tx, provider_rx, providers)
}

// Loads all YANG callback keys from the data providers.
async fn load_callbacks(
    providers: &[NbDaemonSender],
) -> BTreeMap<CallbackKey, NbDaemonSender> {
    let mut callbacks = BTreeMap::new();

    for provider_tx in providers.iter() {
        let (responder_tx, responder_rx) = oneshot::channel();
        let request = papi::daemon::Request::GetCallbacks(
            papi::daemon::GetCallbacksRequest {
                responder: Some(responder_tx),
            },
        );
        provider_tx.send(request).await.unwrap();

        let provider_response = responder_rx.await.unwrap();
        for cb_key in provider_response.callbacks {
            callbacks.insert(cb_key, provider_tx.clone());
        }
    }

    callbacks
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pickledb::{PickleDb, PickleDbDumpPolicy, SerializationMethod};
    use tokio::sync::mpsc;

    use super::*;
    use crate::northbound::client::api::ErrorOption;
    use crate::northbound::confirmed::State;
    use crate::northbound::datastore::FileFormat;
    use crate::northbound::tests::{context_init, parse_config};

    const HOSTNAME_BEFORE: &str = concat!(
        "<system xmlns=\"urn:lattice:system\">",
        "<hostname>before</hostname>",
        "</system>"
    );
    const HOSTNAME_AFTER: &str = concat!(
        "<system xmlns=\"urn:lattice:system\">",
        "<hostname>after</hostname>",
        "</system>"
    );

    struct TestBackend {
        nb: Northbound,
        _dir: tempfile::TempDir,
    }

    fn test_backend() -> TestBackend {
        context_init();
        let dir = tempfile::tempdir().unwrap();
        let db = PickleDb::new(
            dir.path().join("transactions.db"),
            PickleDbDumpPolicy::AutoDump,
            SerializationMethod::Bin,
        );
        let datastores = Datastores::new(
            dir.path().join("datastores"),
            FileFormat::Xml,
            true,
        )
        .unwrap();
        let (_client_tx, rx_clients) = mpsc::channel(4);
        let (tx_providers, rx_providers) = mpsc::unbounded_channel();

        let nb = Northbound {
            datastores,
            db: Arc::new(Mutex::new(db)),
            callbacks: BTreeMap::new(),
            clients: Vec::new(),
            providers: Vec::new(),
            rx_clients,
            rx_providers,
            _tx_providers: tx_providers,
            sessions: SessionTable::default(),
            nacm: Nacm::default(),
            nacm_mode: NacmMode::Internal,
            confirmed_commit: ConfirmedCommit::default(),
            default_confirm_timeout: 600,
            rpc_timeout: None,
            startup_status: StartupStatus::Ok,
        };
        TestBackend { nb, _dir: dir }
    }

    fn attach(nb: &mut Northbound, username: &str) -> u32 {
        let (kill_tx, _kill_rx) = mpsc::unbounded_channel();
        nb.sessions.attach(
            username.to_owned(),
            BTreeSet::new(),
            false,
            kill_tx,
        )
    }

    async fn edit(
        nb: &mut Northbound,
        session_id: u32,
        test_option: TestOption,
        config: &str,
    ) -> std::result::Result<capi::client::Reply, Vec<RpcError>> {
        nb.process_rpc(
            session_id,
            Operation::EditConfig {
                target: DatastoreId::Candidate,
                default_operation: EditOperation::Merge,
                test_option,
                error_option: ErrorOption::StopOnError,
                config: config.to_owned(),
            },
        )
        .await
    }

    async fn commit(
        nb: &mut Northbound,
        session_id: u32,
    ) -> std::result::Result<capi::client::Reply, Vec<RpcError>> {
        nb.process_rpc(
            session_id,
            Operation::Commit {
                confirmed: false,
                confirm_timeout: None,
                persist: None,
                persist_id: None,
            },
        )
        .await
    }

    async fn get_config_xml(
        nb: &mut Northbound,
        session_id: u32,
        source: DatastoreId,
    ) -> String {
        let reply = nb
            .process_rpc(
                session_id,
                Operation::GetConfig {
                    source,
                    filter: None,
                },
            )
            .await
            .unwrap();
        match reply {
            capi::client::Reply::Data(dtree) => dtree
                .print_string(
                    DataFormat::XML,
                    yang3::data::DataPrinterFlags::WITH_SIBLINGS
                        | yang3::data::DataPrinterFlags::SHRINK,
                )
                .unwrap(),
            capi::client::Reply::Ok => panic!("expected data"),
        }
    }

    #[tokio::test]
    async fn edit_then_commit_roundtrip() {
        let mut backend = test_backend();
        let nb = &mut backend.nb;
        let session = attach(nb, "admin");

        edit(nb, session, TestOption::TestThenSet, HOSTNAME_BEFORE)
            .await
            .unwrap();
        commit(nb, session).await.unwrap();

        let running =
            get_config_xml(nb, session, DatastoreId::Running).await;
        let candidate =
            get_config_xml(nb, session, DatastoreId::Candidate).await;
        assert!(running.contains("<hostname>before</hostname>"));
        // Candidate equals running right after a commit.
        assert_eq!(running, candidate);
    }

    #[tokio::test]
    async fn discard_changes_resets_candidate_from_running() {
        let mut backend = test_backend();
        let nb = &mut backend.nb;
        let session = attach(nb, "admin");

        edit(nb, session, TestOption::TestThenSet, HOSTNAME_BEFORE)
            .await
            .unwrap();
        assert!(nb.datastores.is_dirty(DatastoreId::Candidate));

        nb.process_rpc(session, Operation::DiscardChanges)
            .await
            .unwrap();
        let running =
            get_config_xml(nb, session, DatastoreId::Running).await;
        let candidate =
            get_config_xml(nb, session, DatastoreId::Candidate).await;
        assert_eq!(running, candidate);
        assert!(!nb.datastores.is_dirty(DatastoreId::Candidate));
    }

    #[tokio::test]
    async fn lock_conflict_names_the_holder() {
        let mut backend = test_backend();
        let nb = &mut backend.nb;
        let session1 = attach(nb, "alice");
        let session2 = attach(nb, "bob");

        nb.process_rpc(
            session1,
            Operation::Lock {
                target: DatastoreId::Running,
            },
        )
        .await
        .unwrap();

        let errors = nb
            .process_rpc(
                session2,
                Operation::Lock {
                    target: DatastoreId::Running,
                },
            )
            .await
            .unwrap_err();
        let error = &errors[0];
        assert_eq!(error.tag, ErrorTag::LockDenied);
        assert!(error.info.iter().any(|info| matches!(
            info,
            ErrorInfo::SessionId(holder) if *holder == session1
        )));
    }

    #[tokio::test]
    async fn confirmed_commit_timeout_restores_the_snapshot() {
        let mut backend = test_backend();
        let nb = &mut backend.nb;
        let session = attach(nb, "admin");

        edit(nb, session, TestOption::TestThenSet, HOSTNAME_BEFORE)
            .await
            .unwrap();
        commit(nb, session).await.unwrap();

        edit(nb, session, TestOption::TestThenSet, HOSTNAME_AFTER)
            .await
            .unwrap();
        nb.process_rpc(
            session,
            Operation::Commit {
                confirmed: true,
                confirm_timeout: Some(60),
                persist: None,
                persist_id: None,
            },
        )
        .await
        .unwrap();
        let running =
            get_config_xml(nb, session, DatastoreId::Running).await;
        assert!(running.contains("<hostname>after</hostname>"));
        assert_eq!(nb.confirmed_commit.state(), State::Ephemeral);

        // Timer expiry rolls running back to the pre-commit snapshot.
        nb.process_confirmed_commit_timeout().await;
        let running =
            get_config_xml(nb, session, DatastoreId::Running).await;
        assert!(running.contains("<hostname>before</hostname>"));
        assert_eq!(nb.confirmed_commit.state(), State::Inactive);

        let candidate =
            get_config_xml(nb, session, DatastoreId::Candidate).await;
        assert_eq!(running, candidate);
    }

    #[tokio::test]
    async fn plain_commit_finalizes_a_confirmed_commit() {
        let mut backend = test_backend();
        let nb = &mut backend.nb;
        let session = attach(nb, "admin");

        edit(nb, session, TestOption::TestThenSet, HOSTNAME_AFTER)
            .await
            .unwrap();
        nb.process_rpc(
            session,
            Operation::Commit {
                confirmed: true,
                confirm_timeout: Some(60),
                persist: None,
                persist_id: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(nb.confirmed_commit.state(), State::Ephemeral);

        // Another session can't finalize an ephemeral confirmed commit.
        let other = attach(nb, "bob");
        assert!(commit(nb, other).await.is_err());

        commit(nb, session).await.unwrap();
        assert_eq!(nb.confirmed_commit.state(), State::Inactive);

        let running =
            get_config_xml(nb, session, DatastoreId::Running).await;
        assert!(running.contains("<hostname>after</hostname>"));
    }

    #[tokio::test]
    async fn cancel_commit_rolls_back_immediately() {
        let mut backend = test_backend();
        let nb = &mut backend.nb;
        let session = attach(nb, "admin");

        edit(nb, session, TestOption::TestThenSet, HOSTNAME_AFTER)
            .await
            .unwrap();
        nb.process_rpc(
            session,
            Operation::Commit {
                confirmed: true,
                confirm_timeout: Some(600),
                persist: Some("abc".to_owned()),
                persist_id: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(nb.confirmed_commit.state(), State::Persistent);

        // Cancellation from another session requires the persist-id.
        let other = attach(nb, "bob");
        assert!(
            nb.process_rpc(
                other,
                Operation::CancelCommit { persist_id: None }
            )
            .await
            .is_err()
        );
        nb.process_rpc(
            other,
            Operation::CancelCommit {
                persist_id: Some("abc".to_owned()),
            },
        )
        .await
        .unwrap();

        assert_eq!(nb.confirmed_commit.state(), State::Inactive);
        let running =
            get_config_xml(nb, other, DatastoreId::Running).await;
        assert!(!running.contains("after"));
    }

    #[tokio::test]
    async fn session_death_rolls_back_an_ephemeral_commit() {
        let mut backend = test_backend();
        let nb = &mut backend.nb;
        let session = attach(nb, "admin");

        edit(nb, session, TestOption::TestThenSet, HOSTNAME_AFTER)
            .await
            .unwrap();
        nb.process_rpc(
            session,
            Operation::Commit {
                confirmed: true,
                confirm_timeout: Some(600),
                persist: None,
                persist_id: None,
            },
        )
        .await
        .unwrap();

        nb.detach_session(session).await;

        assert_eq!(nb.confirmed_commit.state(), State::Inactive);
        let observer = attach(nb, "bob");
        let running =
            get_config_xml(nb, observer, DatastoreId::Running).await;
        assert!(!running.contains("after"));
    }

    #[tokio::test]
    async fn commit_validation_failure_leaves_running_untouched() {
        let mut backend = test_backend();
        let nb = &mut backend.nb;
        let session = attach(nb, "admin");

        let duplicate_servers = concat!(
            "<system xmlns=\"urn:lattice:system\">",
            "<dns-server><name>a</name><address>192.0.2.1</address>",
            "</dns-server>",
            "<dns-server><name>b</name><address>192.0.2.1</address>",
            "</dns-server>",
            "</system>"
        );
        edit(nb, session, TestOption::Set, duplicate_servers)
            .await
            .unwrap();

        let errors = commit(nb, session).await.unwrap_err();
        assert!(errors.iter().any(|error| {
            error.tag.wire_tag().1 == Some("data-not-unique")
                || error.app_tag.as_deref() == Some("data-not-unique")
        }));

        let running =
            get_config_xml(nb, session, DatastoreId::Running).await;
        assert!(!running.contains("dns-server"));
    }

    #[tokio::test]
    async fn nacm_denial_blocks_the_edit() {
        let mut backend = test_backend();
        let nb = &mut backend.nb;
        nb.nacm = Nacm::from_config(&parse_config(concat!(
            "<nacm xmlns=\"urn:ietf:params:xml:ns:yang:ietf-netconf-acm\">",
            "<enable-nacm>true</enable-nacm>",
            "<write-default>deny</write-default>",
            "</nacm>"
        )));
        let session = attach(nb, "bob");

        let errors =
            edit(nb, session, TestOption::TestThenSet, HOSTNAME_BEFORE)
                .await
                .unwrap_err();
        assert_eq!(errors[0].tag, ErrorTag::AccessDenied);
        assert_eq!(errors[0].message.as_deref(), Some("default deny"));

        // No mutation of any datastore took place.
        assert!(!nb.datastores.is_dirty(DatastoreId::Candidate));
        let candidate = nb
            .datastores
            .tree(DatastoreId::Candidate)
            .unwrap();
        assert!(candidate.reference().is_none());
    }

    #[tokio::test]
    async fn parse_errors_map_to_netconf_tags() {
        let mut backend = test_backend();
        let nb = &mut backend.nb;
        let session = attach(nb, "admin");

        let errors = edit(
            nb,
            session,
            TestOption::TestThenSet,
            "<system xmlns=\"urn:lattice:system\"><bogus/></system>",
        )
        .await
        .unwrap_err();
        assert!(matches!(
            errors[0].tag,
            ErrorTag::UnknownElement | ErrorTag::InvalidValue
        ));

        let errors = edit(
            nb,
            session,
            TestOption::TestThenSet,
            concat!(
                "<system xmlns=\"urn:lattice:system\">",
                "<max-sessions>200</max-sessions>",
                "</system>"
            ),
        )
        .await
        .unwrap_err();
        assert_eq!(errors[0].tag, ErrorTag::InvalidValue);
    }

    #[tokio::test]
    async fn kill_session_releases_locks() {
        let mut backend = test_backend();
        let nb = &mut backend.nb;
        let session1 = attach(nb, "alice");
        let session2 = attach(nb, "bob");

        nb.process_rpc(
            session2,
            Operation::Lock {
                target: DatastoreId::Running,
            },
        )
        .await
        .unwrap();

        nb.process_rpc(
            session1,
            Operation::KillSession {
                session_id: session2,
            },
        )
        .await
        .unwrap();

        nb.process_rpc(
            session1,
            Operation::Lock {
                target: DatastoreId::Running,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn prepare_failure_aborts_in_reverse_order() {
        let mut backend = test_backend();
        let nb = &mut backend.nb;

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = Vec::new();
        for index in 0..2usize {
            let (provider_tx, mut provider_rx) = mpsc::channel(4);
            let log = log.clone();
            let task = lattice_utils::task::Task::spawn(async move {
                while let Some(request) = provider_rx.recv().await {
                    match request {
                        papi::daemon::Request::Validate(request) => {
                            let _ = request.responder.unwrap().send(Ok(
                                papi::daemon::ValidateResponse {},
                            ));
                        }
                        papi::daemon::Request::Commit(request) => {
                            log.lock().unwrap().push((index, request.phase));
                            let result = if request.phase
                                == CommitPhase::Prepare
                                && index == 1
                            {
                                Err(northbound::error::Error::CfgCallback(
                                    "out of resources".to_owned(),
                                ))
                            } else {
                                Ok(papi::daemon::CommitResponse {})
                            };
                            let _ =
                                request.responder.unwrap().send(result);
                        }
                        papi::daemon::Request::GetCallbacks(request) => {
                            let _ = request.responder.unwrap().send(
                                papi::daemon::GetCallbacksResponse {
                                    callbacks: Default::default(),
                                },
                            );
                        }
                        papi::daemon::Request::Get(request) => {
                            let yang_ctx = YANG_CTX.get().unwrap();
                            let _ = request.responder.unwrap().send(Ok(
                                papi::daemon::GetResponse {
                                    data: DataTree::new(yang_ctx),
                                },
                            ));
                        }
                        papi::daemon::Request::Rpc(_) => (),
                    }
                }
            });
            tasks.push(task);
            nb.providers.push(provider_tx);
        }

        let session = attach(nb, "admin");
        edit(nb, session, TestOption::TestThenSet, HOSTNAME_BEFORE)
            .await
            .unwrap();
        let errors = commit(nb, session).await.unwrap_err();
        assert_eq!(errors[0].tag, ErrorTag::OperationFailed);

        // Provider 1 refused preparation, so only provider 0 is aborted.
        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                (0, CommitPhase::Prepare),
                (1, CommitPhase::Prepare),
                (0, CommitPhase::Abort),
            ]
        );

        // Running was left untouched.
        drop(log);
        let running =
            get_config_xml(nb, session, DatastoreId::Running).await;
        assert!(!running.contains("hostname"));
    }
}
