//! Kinegraph Physics Core
//!
//! Secondary-motion integrator used by spring-bone nodes:
//! - [`PhysicsIntegrator`] turns variable frame time into fixed sub-steps plus an
//!   interpolation ratio, and derives the model-space root acceleration.
//! - [`Body`] integrates one bone toward its animated transform with springs, external forces
//!   and optional constraints.

pub mod body;
pub mod config;
pub mod constraint;
pub mod spring;
pub mod system;

pub use body::{Body, BodyInputs, BodyOutput};
pub use config::PhysicsConfig;
pub use constraint::{AngularConstraint, LinearConstraint, LinearLimit};
pub use spring::{DynamicProperty, Integration, Spring, SpringProperties};
pub use system::{PhysicsIntegrator, StepData};
