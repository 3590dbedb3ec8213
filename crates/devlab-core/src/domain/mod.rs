//! Domain entities for DevLab.
//!
//! This module contains pure business vocabulary with no infrastructure
//! dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! Clean Architecture organises code into concentric layers.  The innermost
//! layer is called the **domain** (or "entities" layer).  Domain code:
//!
//! - Contains the core business rules of the application.
//! - Has **no** imports from OS APIs, network libraries, database drivers, or UI
//!   frameworks.
//! - Can be compiled and tested on any platform without any external setup.
//! - Defines the data types and operations that make the system uniquely what it
//!   is: in this case, the identity of a lab device and the lifecycle events
//!   that mark its arrival and departure.
//!
//! Code in outer layers (infrastructure, application, UI) depends on the domain,
//! but the domain never depends on them.  This makes the domain easy to unit-test
//! in isolation.

/// Device identity, connection status, and lifecycle events.
///
/// See [`device::DeviceId`] and [`device::DeviceEvent`] for the main types.
pub mod device;
