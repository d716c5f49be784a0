//! # class-graph
//!
//! Scans a JVM classpath, builds the structural relationship graph between
//! its classes and keeps a live 3-D force-directed layout of that graph for
//! a renderer to draw.
//!
//! ## Architecture
//!
//! - **origin**: Classifies class names as root object, platform, application or unknown
//! - **classfile**: Pull-style classfile decoder producing relationship facts
//! - **graph**: Concurrent node store with symmetric, accumulated edge weights
//! - **scan**: Classpath validation and classfile enumeration
//! - **ingest**: Bounded worker pool feeding decoded facts into the graph
//! - **layout**: Periodic repulsion/attraction relaxation of node positions
//! - **session**: Start/terminate control over one scan and its layout
//! - **report**: Serializable graph snapshot for the command-line host

pub mod classfile;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod layout;
pub mod origin;
pub mod report;
pub mod scan;
pub mod session;

#[cfg(test)]
mod fixture;
