//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

use lattice_northbound as northbound;
use lattice_northbound::rpc_error::{ErrorType, RpcError};

use crate::northbound::datastore;

//
// Type aliases.
//
pub type Result<T> = std::result::Result<T, Error>;

//
// Northbound errors.
//
#[derive(Debug)]
pub enum Error {
    YangInvalidPath(yang3::Error),
    YangInternal(yang3::Error),
    Datastore(datastore::Error),
    TransactionValidation(Vec<RpcError>),
    TransactionPreparation(northbound::error::Error),
    Io(std::io::Error),
}

// ===== impl Error =====

impl Error {
    // Renders the error as the list of rpc-errors returned to the client.
    pub fn into_rpc_errors(self) -> Vec<RpcError> {
        match self {
            Error::YangInvalidPath(error) => {
                vec![RpcError::invalid_value(
                    ErrorType::Application,
                    error.to_string(),
                )]
            }
            Error::YangInternal(error) | Error::Datastore(
                datastore::Error::Yang(error),
            ) => {
                vec![RpcError::operation_failed(
                    ErrorType::Application,
                    error.to_string(),
                )]
            }
            Error::Datastore(datastore::Error::DataExists(path)) => {
                vec![RpcError::data_exists().with_path(path)]
            }
            Error::Datastore(datastore::Error::DataMissing(path)) => {
                vec![
                    RpcError::data_missing("Data is missing; cannot delete \
                                            resource")
                        .with_path(path),
                ]
            }
            Error::Datastore(error) => {
                vec![RpcError::operation_failed(
                    ErrorType::Application,
                    error.to_string(),
                )]
            }
            Error::TransactionValidation(errors) => errors,
            Error::TransactionPreparation(error) => {
                vec![RpcError::operation_failed(
                    ErrorType::Application,
                    error.to_string(),
                )]
            }
            Error::Io(error) => {
                vec![RpcError::operation_failed(
                    ErrorType::Application,
                    error.to_string(),
                )]
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::YangInvalidPath(error) => {
                write!(f, "Invalid YANG data path: {error}")
            }
            Error::YangInternal(error) => {
                write!(f, "YANG internal error: {error}")
            }
            Error::Datastore(error) => {
                write!(f, "Datastore error: {error}")
            }
            Error::TransactionValidation(errors) => {
                write!(f, "Validation error")?;
                if let Some(error) = errors.first() {
                    write!(f, ": {error}")?;
                }
                Ok(())
            }
            Error::TransactionPreparation(error) => {
                write!(f, "Resource allocation error: {error}")
            }
            Error::Io(error) => {
                write!(f, "I/O error: {error}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<datastore::Error> for Error {
    fn from(error: datastore::Error) -> Error {
        Error::Datastore(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::Io(error)
    }
}
