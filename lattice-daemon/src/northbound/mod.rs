//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

mod client;
pub(crate) mod confirmed;
mod core;
pub(crate) mod datastore;
mod db;
mod error;
mod nacm;
mod session;
mod validation;
mod yang;

pub use self::core::Northbound;
pub use self::error::{Error, Result};

// Shared test scaffolding.
#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use lattice_yang::YANG_CTX;
    use yang3::data::{
        DataFormat, DataParserFlags, DataTree, DataValidationFlags,
    };

    // Initializes the process-wide YANG context with the embedded modules.
    // Tests share one context since the schema is immutable.
    pub(crate) fn context_init() {
        YANG_CTX.get_or_init(|| {
            let mut ctx = lattice_yang::new_context();
            for module_name in ["ietf-netconf-acm", "lattice-system"] {
                lattice_yang::load_module(&mut ctx, module_name);
            }
            Arc::new(ctx)
        });
    }

    pub(crate) fn parse_config(xml: &str) -> DataTree<'static> {
        let yang_ctx = YANG_CTX.get().unwrap();
        DataTree::parse_string(
            yang_ctx,
            xml,
            DataFormat::XML,
            DataParserFlags::NO_VALIDATION,
            DataValidationFlags::NO_STATE,
        )
        .unwrap()
    }
}
