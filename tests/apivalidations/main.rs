// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! API Validation Suite
//!
//! Runs the provider's validating webhooks against a real API server. The
//! binary is built with `harness = false`: it starts one suite, runs every
//! case in order and exits non-zero if any case failed.
//!
//! ```bash
//! # Local control plane from envtest binaries
//! KUBEBUILDER_ASSETS=/path/to/bin cargo test --test apivalidations
//!
//! # Existing cluster from the current kubeconfig
//! USE_EXISTING_CLUSTER=true cargo test --test apivalidations
//! ```
//!
//! Without either, the suite is skipped.

#[path = "../common/mod.rs"]
mod common;

mod openstackcluster;
mod openstackmachine;
mod support;
mod templates;

use std::process::ExitCode;

use capo_e2e::envtest::{BinaryAssets, use_existing_cluster_from_env};
use capo_e2e::{ApiValidationSuite, SuiteOptions, TestCase, init_tracing};

fn cases() -> Vec<TestCase> {
    let mut cases = Vec::new();
    cases.extend(openstackcluster::cases());
    cases.extend(openstackmachine::cases());
    cases.extend(templates::cases());
    cases
}

fn main() -> ExitCode {
    init_tracing();

    if !BinaryAssets::configured() && !use_existing_cluster_from_env() {
        println!(
            "API Validation Suite: skipped (set KUBEBUILDER_ASSETS or USE_EXISTING_CLUSTER=true)"
        );
        return ExitCode::SUCCESS;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    runtime.block_on(async {
        let suite = match ApiValidationSuite::start(SuiteOptions::default()).await {
            Ok(suite) => suite,
            Err(e) => {
                eprintln!("API Validation Suite: setup failed: {e}");
                return ExitCode::FAILURE;
            }
        };

        let report = suite.run(cases()).await;
        let stopped = suite.stop().await;

        for name in &report.passed {
            println!("ok    {name}");
        }
        for (name, message) in &report.failed {
            println!("FAIL  {name}: {message}");
        }
        println!(
            "API Validation Suite: {} passed, {} failed",
            report.passed.len(),
            report.failed.len()
        );

        if let Err(e) = stopped {
            eprintln!("API Validation Suite: teardown failed: {e}");
            return ExitCode::FAILURE;
        }
        if report.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    })
}
