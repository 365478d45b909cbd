// SPDX-License-Identifier: Apache-2.0

//! Runs store and array operations inside a separate worker process.

pub mod protocol;
pub mod server;
pub mod worker;

pub use protocol::{Reply, Request, Response, WirePayload, PROTOCOL_VERSION};
pub use server::IsolationServer;
pub use worker::serve;
