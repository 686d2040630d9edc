//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;

use lattice_yang as yang;
use lattice_yang::{YANG_CTX, YANG_IMPLEMENTED_MODULES};

use crate::config::Config;

// Creates the global YANG context from the embedded modules, the configured
// search paths and the operator-supplied module list.
pub(crate) fn create_context(config: &Config) {
    let mut ctx = yang::new_context();

    // Filesystem search paths for operator-supplied models.
    for path in &config.yang.search_paths {
        yang::add_searchdir(&mut ctx, path);
    }

    // Modules the backend itself depends on.
    let mut modules: Vec<String> = YANG_IMPLEMENTED_MODULES
        .iter()
        .map(|name| (*name).to_owned())
        .collect();

    // Operator-supplied data models.
    for name in &config.yang.modules {
        if !modules.iter().any(|module| module == name) {
            modules.push(name.clone());
        }
    }
    if let Some(name) = &config.yang.main_module {
        if !modules.iter().any(|module| module == name) {
            modules.push(name.clone());
        }
    }

    for module_name in &modules {
        yang::load_module(&mut ctx, module_name);
    }

    YANG_CTX
        .set(Arc::new(ctx))
        .expect("YANG context was already created");
}
