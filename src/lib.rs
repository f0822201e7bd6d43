//! # vineflower-bridge
//!
//! Runs the Vineflower decompiler for class files and hands back the source
//! text, the line-number mapping and the source language family.
//!
//! ## Architecture
//!
//! - **api**: The surface a decompiler library offers, and what the bridge passes back
//! - **binding**: One-time resolution of required and optional library capabilities
//! - **options**: Option normalization for the legacy and descriptive key generations
//! - **invoker**: Background decompiler thread plus the caller-side read task pump
//! - **pump**: Queue that runs read actions on the calling thread
//! - **resolver**: Project-backed lookup of classes referenced by the decompiled unit
//! - **host**: Read access, cancellation and settings of the surrounding environment
//! - **index**: Classpath index over class directories and jars
//! - **vfs**: Local files and jar entries
//! - **language**: Source language classification through the library's plugins
//! - **classfile**: Constant pool scanner
//! - **jar**: Vineflower driven as a `java -jar` subprocess

pub mod api;
pub mod binding;
pub mod classfile;
pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod index;
pub mod invoker;
pub mod jar;
pub mod language;
pub mod logger;
pub mod options;
pub mod provider;
pub mod pump;
pub mod resolver;
pub mod vfs;
