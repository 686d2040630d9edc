//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod data_tree;
