// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provision application containers and virtual machines on Proxmox VE.
//!
//! Settings come from four __precedence tiers__: environment variables, the
//! per-app defaults file, the global defaults file, and built-in defaults.
//! See [`resolve`] for how they are merged, and [`store`] for how defaults
//! files are kept.
//!
//! Failures carry categorized exit codes (see [`exit`]) and are reported by
//! a single top-level [`trap::ErrorTrap`].

pub mod config;
pub mod exit;
pub mod path;
pub mod provision;
pub mod resolve;
pub mod store;
pub mod trap;
pub mod wizard;
