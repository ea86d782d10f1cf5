//! Freva REST is a web service that sits between users (HTTP clients, CLIs,
//! notebooks) and the heterogeneous back ends of a climate-data site: an
//! Apache Solr full-text index holding per-file metadata, a MongoDB document
//! store for usage statistics and user-owned flavour definitions, and a
//! redis-coordinated data-loading worker that opens scientific files and
//! exposes them as chunked Zarr arrays.
//!
//! ## Features
//!
//! The service provides the following features:
//!
//! * Databrowser search API: flavour translation, faceted search, cursor
//!   streaming, time and bounding-box filtering, intake-esm catalogues and
//!   user-data ingestion
//! * STAC API (1.1.0) over the same index
//! * Zarr streaming with deterministic conversion tokens and HMAC-signed,
//!   expiring share URLs
//! * OpenID Connect termination: code flow, device flow, token validation
//!   with claim filters
//! * [Prometheus](https://prometheus.io/) metrics
//!
//! Freva REST is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Axum](axum) web framework, built by the Tokio team.
//! * [Serde](serde) performs (de)serialisation of JSON request and response data.
//! * [reqwest] talks to Solr and the OpenID Connect provider.
//! * [redis] provides the conversion cache and the worker broker channel.
//! * [mongodb] stores statistics and user flavours.

pub mod app;
pub mod app_state;
pub mod auth;
pub mod bbox;
pub mod cache;
pub mod cli;
pub mod config;
pub mod databrowser;
pub mod error;
pub mod facet;
pub mod flavour;
pub mod intake;
pub mod metrics;
pub mod portal;
pub mod server;
pub mod share;
pub mod solr;
pub mod stac;
pub mod stats;
pub mod store;
pub mod timespec;
pub mod tracing;
pub mod validated_json;
pub mod zarr;
