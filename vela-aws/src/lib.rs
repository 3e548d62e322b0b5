//! Vela AWS
//!
//! Resource controllers mapping declarative configuration onto AWS API
//! calls for Batch compute environments, ELBv2 load balancers, and SSM
//! documents. Each controller owns its injected SDK clients and drives the
//! shared polling loop from vela-core between mutations.

pub mod arn;
pub mod batch;
pub mod elbv2;
pub mod eni;
pub mod ssm;
