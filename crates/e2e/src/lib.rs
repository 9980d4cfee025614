//! TodoMVC E2E Suite
//!
//! End-to-end scenarios for the TodoMVC reference app, driven over the W3C
//! WebDriver protocol and reported as Allure result files:
//! - Spawns (or attaches to) a WebDriver server
//! - Opens a fresh browser session per scenario
//! - Asserts on rendered DOM state and on the list the app persists in `localStorage`
//! - Records every action and check as nested, named steps
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Scenario Runner (Rust)                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                 │
//! │    ├── start_driver() -> DriverHandle                       │
//! │    ├── run_selection(&Selection) -> TestSuiteResult         │
//! │    │     └── per scenario (up to `workers` at once):        │
//! │    │           TodoPage::open()   fresh session             │
//! │    │           "Navigate to TodoMVC App"                    │
//! │    │           suite before_each, scenario body             │
//! │    │           ResultsWriter::write_result()                │
//! │    └── write_results() -> test-results.json                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioContext                                            │
//! │    ├── page: TodoPage      locators, actions, expectations  │
//! │    ├── steps: StepRecorder nested report steps              │
//! │    └── storage()           polls the persisted todo list    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod driver;
pub mod error;
pub mod page;
pub mod report;
pub mod runner;
pub mod scenarios;
pub mod step;
pub mod storage;
pub mod visual;
pub mod wait;

pub use error::{E2eError, E2eResult};
pub use runner::{RunnerConfig, Selection, TestRunner};
pub use step::StepRecorder;
pub use storage::{LocalStorageTodos, StorageReader, TodoItem};
