//! Mimir AIP E2E Test Framework
//!
//! This crate runs the browser and API end-to-end suite for the Mimir AIP
//! console against a live backend:
//! - Drives Playwright through a long-lived `node` driver process
//! - Bootstraps an authenticated session, tolerating auth-disabled backends
//! - Waits for page readiness through explicit signals instead of network idle
//! - Provisions prerequisite backend data (ontology, pipeline, extraction job, twin)
//! - Parses declarative YAML test specs
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    E2E Test Runner (Rust)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                  │
//! │    ├── connect() -> backend healthy, API token             │
//! │    ├── Provisioner::setup_test_data() -> FixtureContext    │
//! │    ├── PlaywrightPage::launch() -> impl Page               │
//! │    ├── SessionBootstrapper::bootstrap() -> SessionReport   │
//! │    └── execute_step(step) -> StepResult                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestSpec (YAML)                                            │
//! │    ├── name, description, tags                              │
//! │    ├── setup { login, fixtures }, requires                  │
//! │    ├── steps: [Step]                                        │
//! │    │     ├── navigate { url, ready? }                       │
//! │    │     ├── wait_ready { heading?, loading_gone?, ... }    │
//! │    │     ├── click / fill / press { locator }               │
//! │    │     ├── assert { locator, visible?, count?, ... }      │
//! │    │     ├── api { method, path, expect_status? }           │
//! │    │     └── execute_tool { tool, input }                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod error;
pub mod fixture;
pub mod page;
pub mod playwright;
pub mod provision;
pub mod readiness;
pub mod runner;
pub mod session;
pub mod spec;

pub use api::{ApiClient, ApiConfig};
pub use error::{E2eError, E2eResult};
pub use fixture::{Fixture, FixtureContext, FixtureRequest};
pub use page::{Locator, Page};
pub use provision::{Provisioned, Provisioner};
pub use readiness::{navigate_and_wait, wait_for_page_ready, ReadinessOptions};
pub use runner::TestRunner;
pub use session::{LoginOutcome, SessionBootstrapper, SessionReport};
pub use spec::{TestSpec, TestStep};
