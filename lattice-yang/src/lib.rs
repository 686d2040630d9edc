//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod serde;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, LazyLock as Lazy, OnceLock};

use maplit::hashmap;
use tracing::error;
use yang3::context::{
    Context, ContextFlags, EmbeddedModuleKey, EmbeddedModules,
};

// Global YANG context.
pub static YANG_CTX: OnceLock<Arc<Context>> = OnceLock::new();

// List of embedded YANG modules.
//
// Modules the backend itself depends on are compiled into the binary.
// Operator-supplied models are loaded from the configured search paths
// instead.
pub static YANG_EMBEDDED_MODULES: Lazy<EmbeddedModules> = Lazy::new(|| {
    hashmap! {
        // IETF modules
        EmbeddedModuleKey::new("ietf-netconf-acm", Some("2018-02-14"), None, None) =>
            include_str!("../modules/ietf/ietf-netconf-acm@2018-02-14.yang"),
        // Lattice modules
        EmbeddedModuleKey::new("lattice-system", Some("2025-03-11"), None, None) =>
            include_str!("../modules/lattice/lattice-system@2025-03-11.yang"),
    }
});

// All modules implemented by default.
pub static YANG_IMPLEMENTED_MODULES: Lazy<Vec<&'static str>> =
    Lazy::new(|| {
        vec![
            // IETF modules
            "ietf-netconf-acm",
            // Lattice modules
            "lattice-system",
        ]
    });

// All features currently supported, per module.
pub static YANG_FEATURES: Lazy<HashMap<&'static str, Vec<&'static str>>> =
    Lazy::new(|| hashmap! {});

// ===== global functions =====

// Creates empty YANG context.
pub fn new_context() -> Context {
    let mut ctx = Context::new(ContextFlags::NO_YANGLIBRARY)
        .expect("Failed to create YANG context");
    ctx.set_embedded_modules(&YANG_EMBEDDED_MODULES);
    ctx
}

// Adds a filesystem search path for operator-supplied YANG modules.
pub fn add_searchdir<P: AsRef<Path>>(ctx: &mut Context, path: P) {
    if let Err(error) = ctx.set_searchdir(path) {
        error!(%error, "failed to add YANG search path");
        std::process::exit(1);
    }
}

// Loads a YANG module.
pub fn load_module(ctx: &mut Context, name: &str) {
    let features = YANG_FEATURES
        .get(name)
        .map(|features| features.as_slice())
        .unwrap_or_else(|| &[]);
    if let Err(error) = ctx.load_module(name, None, features) {
        error!(%error, "failed to load YANG module");
        std::process::exit(1);
    }
}
