// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! CallRelay Core - call records and the transport-independent parts of call ingestion.
//!
//! ## Core Modules
//!
//! - [`types`]: Call records, protocol/transport modes and audio codecs
//! - [`classify`]: Ordered protocol predicates turning raw fields into a [`CallRecord`]
//! - [`registry`]: Authorized systems and credential checks
//! - [`artifact`]: Deterministic artifact paths and atomic, no-clobber placement
//! - [`error`]: Error types and handling
//!
//! ## Quick Start
//!
//! ```ignore
//! use callrelay_core::{classify, ArtifactSource, ArtifactStore, SystemKind, Transport};
//!
//! let system = registry.authorize("7", "K1", SystemKind::Sdrtrunk)?;
//! let record = classify(&fields, &system.alias, Transport::SdrTrunk, now);
//! let placed = store.place(&record, ArtifactSource::Bytes(audio), AudioCodec::Mp3).await?;
//! ```

pub mod artifact;
pub mod classify;
pub mod error;
pub mod registry;
pub mod types;

pub use artifact::{ArtifactSource, ArtifactStore, PlacedArtifact};
pub use classify::{classify, detect_protocol};
pub use error::{AuthFailure, CoreError, StorageFailure};
pub use registry::{AuthorizedSystem, SystemKind, SystemRegistry};
pub use types::{AudioCodec, CallParts, CallRecord, Mode, Protocol, RawFields, Transport};
