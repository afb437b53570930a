//! Integration tests for the agrisage-kernel crate.
//!
//! These tests exercise the capability registry, timeout enforcement and the
//! tool-owned cache as integrated subsystems.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use agrisage_kernel::{
    CapabilityRegistry, IntentTag, RegistryBuilder, ToolCache, ToolDescriptor, ToolError,
    ToolHandler, ToolOutput,
};

struct SlowHandler {
    delay: Duration,
}

#[async_trait]
impl ToolHandler for SlowHandler {
    async fn invoke(&self, _tool: &str, _arguments: Value) -> Result<ToolOutput, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(ToolOutput::text("done"))
    }
}

/// Weather stub that counts upstream fetches and reads through a cache.
struct CachedWeather {
    cache: ToolCache<String>,
    fetches: Arc<AtomicU32>,
}

#[async_trait]
impl ToolHandler for CachedWeather {
    async fn invoke(&self, tool: &str, arguments: Value) -> Result<ToolOutput, ToolError> {
        let location = arguments["location"]
            .as_str()
            .ok_or_else(|| ToolError::execution(tool, "missing location"))?
            .to_lowercase();
        let fetches = Arc::clone(&self.fetches);
        let key = location.clone();

        let forecast = self
            .cache
            .get_or_try_insert_with(&key, || async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ToolError>(format!("forecast for {location}: 12mm rain"))
            })
            .await?;
        Ok(ToolOutput::Text(forecast))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Timeouts
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn invocation_times_out_with_caller_budget() {
    let registry = RegistryBuilder::new()
        .register(
            ToolDescriptor::new("slow", "slow tool"),
            SlowHandler {
                delay: Duration::from_millis(500),
            },
        )
        .build()
        .unwrap();

    let err = registry
        .invoke("slow", json!({}), Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn descriptor_timeout_overrides_caller_budget() {
    let registry = RegistryBuilder::new()
        .register(
            ToolDescriptor::new("patient", "heavy I/O tool").with_timeout(Duration::from_secs(2)),
            SlowHandler {
                delay: Duration::from_millis(50),
            },
        )
        .build()
        .unwrap();

    // The caller budget alone would expire first.
    let output = registry
        .invoke("patient", json!({}), Duration::from_millis(5))
        .await
        .expect("descriptor budget is long enough");
    assert_eq!(output, ToolOutput::text("done"));
}

// ═══════════════════════════════════════════════════════════════════════
//  Concurrent reads
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn shared_registry_serves_concurrent_callers() {
    let fetches = Arc::new(AtomicU32::new(0));
    let registry: Arc<CapabilityRegistry> = Arc::new(
        RegistryBuilder::new()
            .register(
                ToolDescriptor::new("get_weather_data", "forecast")
                    .with_tags([IntentTag::Weather]),
                CachedWeather {
                    cache: ToolCache::new(Duration::from_secs(60)),
                    fetches: Arc::clone(&fetches),
                },
            )
            .build()
            .unwrap(),
    );

    // Warm the cache so every concurrent read is a hit.
    registry
        .invoke("get_weather_data", json!({"location": "Paris"}), Duration::from_secs(1))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            registry
                .invoke("get_weather_data", json!({"location": "PARIS"}), Duration::from_secs(1))
                .await
        }));
    }

    for handle in handles {
        let output = handle.await.unwrap().unwrap();
        assert_eq!(output.render(), "forecast for paris: 12mm rain");
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_argument_surfaces_as_execution_error() {
    let registry = RegistryBuilder::new()
        .register(
            ToolDescriptor::new("get_weather_data", "forecast"),
            CachedWeather {
                cache: ToolCache::new(Duration::from_secs(60)),
                fetches: Arc::new(AtomicU32::new(0)),
            },
        )
        .build()
        .unwrap();

    let err = registry
        .invoke("get_weather_data", json!({}), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Execution { .. }));
}

// ═══════════════════════════════════════════════════════════════════════
//  Listing
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn list_returns_descriptors_in_declaration_order() {
    let registry = RegistryBuilder::new()
        .register(
            ToolDescriptor::new("diagnose_disease", "diagnosis")
                .with_tags([IntentTag::DiseaseDiagnosis])
                .with_dependencies(["generate_treatment_plan"]),
            SlowHandler {
                delay: Duration::ZERO,
            },
        )
        .register(
            ToolDescriptor::new("generate_treatment_plan", "plan").with_tags([IntentTag::Planning]),
            SlowHandler {
                delay: Duration::ZERO,
            },
        )
        .build()
        .unwrap();

    let listed = registry.list();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].name, "diagnose_disease");
    assert_eq!(listed[0].dependencies, vec!["generate_treatment_plan"]);
    assert!(listed[1].serves(IntentTag::Planning));
}
