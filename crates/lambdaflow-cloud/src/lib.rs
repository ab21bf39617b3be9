//! LambdaFlow Cloud
//!
//! Declarative provisioning of a function-as-a-service deployment: an
//! execution role, a session table, a dependency layer, the function itself
//! and its public URL.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  lflow CLI                       │
//! │             (deploy / plan / ...)                │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               lambdaflow-cloud                   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  Workflow (StepGraph) -> Provisioner      │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  trait ControlPlane { ... }               │   │
//! │  └──────────────────────────────────────────┘   │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │      aws      │ │   in-memory   │
//! │ control plane │ │ control plane │
//! └───────────────┘ └───────────────┘
//! ```
//!
//! Every operation reads before it writes, so a run can be repeated at any
//! time and converges to the declared state.

pub mod action;
pub mod error;
pub mod memory;
pub mod provider;
pub mod provisioner;
pub mod resource;
pub mod wait;
pub mod workflow;

// Re-exports
pub use action::{Action, ActionType, ApplyResult, Plan, PlanSummary};
pub use error::{CloudError, Result};
pub use memory::InMemoryControlPlane;
pub use provider::{
    AuthStatus, ControlPlane, FunctionDescription, RetryConfig, RoleDescription,
    TableDescription, TableStatus, UpdateStatus, UrlDescription,
};
pub use provisioner::{FunctionDeployment, Provisioner, ProvisionerOptions};
pub use resource::{
    Architecture, AttributeType, BillingMode, FunctionConfig, FunctionSpec, InlinePolicySpec,
    InvokeMode, KeyAttribute, KeySchema, LayerSpec, PackageArtifact, PolicyScope,
    ResourceKind, ResourceSet, ResourceSpec, RoleSpec, TableSpec, UrlSpec,
    BASIC_EXECUTION_POLICY_ARN, LAMBDA_SERVICE_PRINCIPAL, trust_policy_for,
};
pub use workflow::{
    Artifacts, DeployOptions, DeployOutcome, StepGraph, StepId, Workflow, LAMBDA_URL_KEY,
    LAYER_ARN_KEY,
};
