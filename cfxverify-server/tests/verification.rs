//! End-to-end flow over the real dispatcher and pipeline with the external
//! collaborators (compiler gateway, bytecode comparator) mocked out.

use async_trait::async_trait;
use cfxverify_compilation::{CompilerGateway, CompilerInput, CompilerOutput, GatewayError};
use cfxverify_server::{
    Chain, ChainMap, ContractVerifier, DispatcherConfig, JobLedger, JobStatus, MatchOutcome,
    RecompiledContract, ServerError, VerificationService, VerifyFromJsonInput, WorkerDispatcher,
};
use semver::Version;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::time::{sleep, Duration};
use uuid::Uuid;

struct MockGateway {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl CompilerGateway for MockGateway {
    async fn compile(
        &self,
        _version: &Version,
        input: &CompilerInput,
        _force_emscripten: bool,
    ) -> Result<CompilerOutput, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(GatewayError::new("solc exited with code 1"))
        }
        // one deployable contract per input source file
        let mut contracts = serde_json::Map::new();
        for (index, path) in input.sources.keys().enumerate() {
            let name = path.trim_end_matches(".sol").to_string();
            let mut by_name = serde_json::Map::new();
            by_name.insert(
                name,
                serde_json::json!({ "evm": {
                    "bytecode": { "object": "60".repeat(10 + index) },
                    "deployedBytecode": { "object": "60806040aabbccdd0004" }
                } }),
            );
            contracts.insert(path.clone(), serde_json::Value::Object(by_name));
        }
        Ok(serde_json::from_value(serde_json::json!({ "contracts": contracts })).unwrap())
    }
}

struct MockComparator {
    outcome: MatchOutcome,
}

#[async_trait]
impl cfxverify_server::BytecodeComparator for MockComparator {
    async fn compare(
        &self,
        _chain_id: u64,
        _address: &str,
        _recompiled: &RecompiledContract,
    ) -> Result<MatchOutcome, String> {
        Ok(self.outcome)
    }
}

fn chains() -> Arc<ChainMap> {
    Arc::new(ChainMap::new([Chain {
        id: 1030,
        name: "Conflux eSpace".to_string(),
        scan_api_url: "https://evmapi.confluxscan.io/api".to_string(),
        scan_api_key: None,
    }]))
}

fn service_with(
    gateway: Arc<MockGateway>,
    outcome: MatchOutcome,
) -> (VerificationService, Arc<JobLedger>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let chains = chains();
    let ledger = Arc::new(JobLedger::new());
    let verifier = Arc::new(ContractVerifier::new(
        gateway,
        Arc::new(MockComparator { outcome }),
        Arc::clone(&chains),
    ));
    let dispatcher = Arc::new(WorkerDispatcher::new(
        Arc::clone(&ledger),
        verifier,
        DispatcherConfig { workers: 2, ..Default::default() },
    ));
    (VerificationService::new(chains, dispatcher), ledger)
}

fn json_request() -> VerifyFromJsonInput {
    VerifyFromJsonInput {
        std_json_input: serde_json::from_value(serde_json::json!({
            "language": "Solidity",
            "sources": { "Token.sol": { "content": "contract Token {}" } },
            "settings": { "optimizer": { "enabled": true, "runs": 200 } }
        }))
        .unwrap(),
        compiler_version: "v0.8.19+commit.7dd6d404".to_string(),
        contract_identifier: "Token.sol:Token".to_string(),
        constructor_arguments: None,
        creation_transaction_hash: None,
        license_type: Some(3),
        contract_label: None,
    }
}

async fn wait_terminal(ledger: &JobLedger, id: Uuid) -> JobStatus {
    for _ in 0..1000 {
        let job = ledger.job(id).expect("job is queryable");
        if job.status.is_terminal() {
            return job.status
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("job {id} never reached a terminal state");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn submit_compile_match_succeed() {
    let gateway = Arc::new(MockGateway { calls: AtomicUsize::new(0), fail: false });
    let (service, ledger) = service_with(gateway.clone(), MatchOutcome::Full);

    let id = service.verify_from_json_input("1030", "0xAABB", json_request()).unwrap();
    assert_eq!(wait_terminal(&ledger, id).await, JobStatus::Succeeded);
    // one job, one compiler invocation
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);

    // the target is now verified; resubmission is rejected synchronously
    let err = service.verify_from_json_input("1030", "0xaabb", json_request()).unwrap_err();
    assert!(matches!(err, ServerError::AlreadyVerified { chain_id: 1030, .. }));
    assert!(err.is_client_error());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn compiler_failure_is_recorded_and_resubmission_admitted() {
    let gateway = Arc::new(MockGateway { calls: AtomicUsize::new(0), fail: true });
    let (service, ledger) = service_with(gateway, MatchOutcome::Full);

    let id = service.verify_from_json_input("1030", "0xAABB", json_request()).unwrap();
    let status = wait_terminal(&ledger, id).await;
    assert!(
        matches!(&status, JobStatus::Failed(reason) if reason.contains("solc exited with code 1")),
        "unexpected status: {status:?}"
    );

    // a failed job does not block a new attempt
    service.verify_from_json_input("1030", "0xAABB", json_request()).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mismatch_fails_the_job() {
    let gateway = Arc::new(MockGateway { calls: AtomicUsize::new(0), fail: false });
    let (service, ledger) = service_with(gateway, MatchOutcome::Mismatch);

    let id = service.verify_from_json_input("1030", "0xAABB", json_request()).unwrap();
    let status = wait_terminal(&ledger, id).await;
    assert!(matches!(&status, JobStatus::Failed(reason) if reason.contains("does not match")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn metadata_submission_compiles_with_all_uploaded_sources() {
    let gateway = Arc::new(MockGateway { calls: AtomicUsize::new(0), fail: false });
    let (service, ledger) = service_with(gateway, MatchOutcome::Partial);

    let metadata = serde_json::from_value(serde_json::json!({
        "compiler": { "version": "0.8.19+commit.7dd6d404" },
        "language": "Solidity",
        "settings": {
            "compilationTarget": { "Token.sol": "Token" },
            "optimizer": { "enabled": true, "runs": 200 }
        },
        "sources": { "Token.sol": { "keccak256": "0xabc" } }
    }))
    .unwrap();
    let sources = BTreeMap::from([
        ("Token.sol".to_string(), "contract Token {}".to_string()),
        // not referenced by the metadata but kept for display
        ("README.md".to_string(), "docs".to_string()),
    ]);

    let id = service
        .verify_from_metadata("1030", "0xCCDD", metadata, sources, None)
        .unwrap();
    assert_eq!(wait_terminal(&ledger, id).await, JobStatus::Succeeded);
}
