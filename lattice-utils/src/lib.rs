//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::{Arc, Mutex};

use pickledb::PickleDb;
use tokio::sync::{mpsc, oneshot};

pub mod task;
pub mod yang;

pub type Database = Arc<Mutex<PickleDb>>;
pub type DatabaseError = pickledb::error::Error;

//
// Channel type aliases.
//
pub type Sender<T> = mpsc::Sender<T>;
pub type Receiver<T> = mpsc::Receiver<T>;
pub type UnboundedSender<T> = mpsc::UnboundedSender<T>;
pub type UnboundedReceiver<T> = mpsc::UnboundedReceiver<T>;
pub type Responder<T> = oneshot::Sender<T>;
