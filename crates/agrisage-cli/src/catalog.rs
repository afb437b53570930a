//! Demo capability catalog.
//!
//! Stub agronomy tools with canned data, enough to exercise classification,
//! selection, delegation and synthesis end to end against a live provider.
//! The two `consult_*` agents each run their own reasoning loop over a
//! private sub-registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::debug;

use agrisage_agent::delegate_schema;
use agrisage_kernel::{
    CapabilityRegistry, FnHandler, IntentTag, RegistryBuilder, ToolCache, ToolDescriptor,
    ToolError, ToolHandler, ToolOutput,
};

/// How long a weather report stays fresh.
const WEATHER_TTL: Duration = Duration::from_secs(15 * 60);

/// Canned daily rainfall, in mm.
const RAIN_MM: [f64; 7] = [0.0, 4.5, 12.0, 0.5, 0.0, 2.0, 8.0];

// ---------------------------------------------------------------------------
// Weather
// ---------------------------------------------------------------------------

/// Weather stub reading through a TTL cache keyed by location.
pub struct WeatherStub {
    cache: ToolCache<ToolOutput>,
}

impl WeatherStub {
    #[must_use]
    pub fn new(cache: ToolCache<ToolOutput>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ToolHandler for WeatherStub {
    async fn invoke(&self, tool: &str, arguments: Value) -> Result<ToolOutput, ToolError> {
        let location = string_arg(&arguments, "location")
            .ok_or_else(|| ToolError::execution(tool, "location is required"))?;
        let days = arguments.get("days").and_then(Value::as_u64).unwrap_or(3).min(7);
        let key = format!("{}:{days}", location.to_lowercase());

        self.cache
            .get_or_try_insert_with(&key, || async {
                debug!(location = %location, days, "generating weather report");
                let forecast: Vec<Value> = (0..days)
                    .map(|day| {
                        let rain_mm = RAIN_MM[day as usize % RAIN_MM.len()];
                        json!({
                            "day": day,
                            "rain_mm": rain_mm,
                            "wind_kmh": 10 + day * 4,
                            "t_min_c": 3 + day,
                            "t_max_c": 14 + day,
                        })
                    })
                    .collect();
                Ok::<_, ToolError>(ToolOutput::Structured(json!({
                    "location": location,
                    "fetched_at": Utc::now().to_rfc3339(),
                    "forecast": forecast,
                })))
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Domain stubs
// ---------------------------------------------------------------------------

fn string_arg(arguments: &Value, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn diagnose(arguments: Value) -> Result<ToolOutput, String> {
    let crop = string_arg(&arguments, "crop").unwrap_or_else(|| "blé".into());
    let symptoms = string_arg(&arguments, "symptoms").ok_or("symptoms are required")?;
    let lowered = symptoms.to_lowercase();

    let (disease, confidence) = if lowered.contains("jaune") || lowered.contains("yellow") {
        ("rouille jaune (Puccinia striiformis)", 0.72)
    } else if lowered.contains("brun") || lowered.contains("brown") {
        ("septoriose (Zymoseptoria tritici)", 0.64)
    } else {
        ("oïdium (Blumeria graminis)", 0.41)
    };

    Ok(ToolOutput::Structured(json!({
        "crop": crop,
        "symptoms": symptoms,
        "probable_disease": disease,
        "confidence": confidence,
    })))
}

fn treatment_plan(arguments: Value) -> Result<ToolOutput, String> {
    let disease = string_arg(&arguments, "disease").ok_or("disease is required")?;
    Ok(ToolOutput::text(format!(
        "Programme for {disease}: one fungicide pass at first symptoms, \
         dose maximale 1.0 L/ha, renew after 21 days if pressure persists. \
         Do not spray when wind exceeds 19 km/h."
    )))
}

fn identify_pest(arguments: Value) -> Result<ToolOutput, String> {
    let description = string_arg(&arguments, "description").ok_or("description is required")?;
    let pest = if description.to_lowercase().contains("puceron")
        || description.to_lowercase().contains("aphid")
    {
        "puceron du blé (Sitobion avenae)"
    } else {
        "limace grise (Deroceras reticulatum)"
    };
    Ok(ToolOutput::Structured(json!({
        "description": description,
        "probable_pest": pest,
        "threshold": "intervene above 10 individuals per plant",
    })))
}

fn check_regulations(arguments: Value) -> Result<ToolOutput, String> {
    let product = string_arg(&arguments, "product").unwrap_or_else(|| "fongicide".into());
    Ok(ToolOutput::text(format!(
        "{product}: zone non traitée 5 m near water, dose maximale autorisée 0.75 L/ha, \
         pre-harvest interval 35 days. Spraying is forbidden when wind exceeds 19 km/h."
    )))
}

fn plan_rotation(arguments: Value) -> Result<ToolOutput, String> {
    let current = string_arg(&arguments, "current_crop").ok_or("current_crop is required")?;
    Ok(ToolOutput::Structured(json!({
        "current_crop": current,
        "suggested_sequence": ["colza", "blé tendre", "orge de printemps", "féverole"],
        "notes": "break cereal sequences with a legume every four years",
    })))
}

fn assess_sustainability(arguments: Value) -> Result<ToolOutput, String> {
    let practice = string_arg(&arguments, "practice").ok_or("practice is required")?;
    Ok(ToolOutput::Structured(json!({
        "practice": practice,
        "carbon_kg_co2e_per_ha": 310,
        "biodiversity_score": "medium",
    })))
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "object", "properties": properties, "required": required })
}

fn weather_descriptor() -> ToolDescriptor {
    ToolDescriptor::new("get_weather_data", "Weather forecast for a location")
        .with_schema(object_schema(
            json!({
                "location": { "type": "string" },
                "days": { "type": "integer", "minimum": 1, "maximum": 16 }
            }),
            &["location"],
        ))
        .with_tags([IntentTag::Weather])
        .with_keywords(["météo", "meteo", "pluie", "forecast", "weather"])
        .with_timeout(Duration::from_secs(10))
}

fn diagnose_descriptor() -> ToolDescriptor {
    ToolDescriptor::new("diagnose_disease", "Probable disease from crop symptoms")
        .with_schema(object_schema(
            json!({
                "crop": { "type": "string" },
                "symptoms": { "type": "string" }
            }),
            &["symptoms"],
        ))
        .with_tags([IntentTag::DiseaseDiagnosis])
        .with_keywords(["taches", "maladie", "symptoms"])
        .with_dependencies(["generate_treatment_plan"])
}

fn treatment_descriptor() -> ToolDescriptor {
    ToolDescriptor::new("generate_treatment_plan", "Treatment programme for a disease")
        .with_schema(object_schema(
            json!({ "disease": { "type": "string" } }),
            &["disease"],
        ))
        .with_tags([IntentTag::Planning])
}

fn pest_descriptor() -> ToolDescriptor {
    ToolDescriptor::new("identify_pest", "Pest identification from a description")
        .with_schema(object_schema(
            json!({ "description": { "type": "string" } }),
            &["description"],
        ))
        .with_tags([IntentTag::PestId])
        .with_keywords(["insecte", "puceron", "ravageur"])
}

fn regulations_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "check_regulations",
        "Buffer zones, authorised doses and deadlines for a product",
    )
    .with_schema(object_schema(
        json!({ "product": { "type": "string" } }),
        &[],
    ))
    .with_tags([IntentTag::RegulatoryCheck])
    .with_keywords(["znt", "réglementation", "autorisé"])
}

fn rotation_descriptor() -> ToolDescriptor {
    ToolDescriptor::new("plan_crop_rotation", "Rotation planning from the current crop")
        .with_schema(object_schema(
            json!({ "current_crop": { "type": "string" } }),
            &["current_crop"],
        ))
        .with_tags([IntentTag::Planning])
        .with_keywords(["rotation", "assolement"])
}

fn sustainability_descriptor() -> ToolDescriptor {
    ToolDescriptor::new("assess_sustainability", "Environmental footprint of a practice")
        .with_schema(object_schema(
            json!({ "practice": { "type": "string" } }),
            &["practice"],
        ))
        .with_tags([IntentTag::Sustainability])
        .with_keywords(["carbone", "biodiversité"])
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Shared handlers, so the root registry and the agent sub-registries run
/// the same stub instances.
struct Handlers {
    weather: Arc<dyn ToolHandler>,
    diagnose: Arc<dyn ToolHandler>,
    treatment: Arc<dyn ToolHandler>,
    pest: Arc<dyn ToolHandler>,
    regulations: Arc<dyn ToolHandler>,
}

impl Handlers {
    fn new(weather_cache: ToolCache<ToolOutput>) -> Self {
        Self {
            weather: Arc::new(WeatherStub::new(weather_cache)),
            diagnose: Arc::new(FnHandler::new(diagnose)),
            treatment: Arc::new(FnHandler::new(treatment_plan)),
            pest: Arc::new(FnHandler::new(identify_pest)),
            regulations: Arc::new(FnHandler::new(check_regulations)),
        }
    }
}

fn crop_health_scope(handlers: &Handlers) -> agrisage_kernel::Result<CapabilityRegistry> {
    RegistryBuilder::new()
        .register_shared(diagnose_descriptor(), Arc::clone(&handlers.diagnose))
        .register_shared(treatment_descriptor(), Arc::clone(&handlers.treatment))
        .register_shared(pest_descriptor(), Arc::clone(&handlers.pest))
        .register_shared(weather_descriptor(), Arc::clone(&handlers.weather))
        .build()
}

fn compliance_scope(handlers: &Handlers) -> agrisage_kernel::Result<CapabilityRegistry> {
    RegistryBuilder::new()
        .register_shared(regulations_descriptor(), Arc::clone(&handlers.regulations))
        .build()
}

/// Build the demo catalog.
pub fn demo_catalog() -> agrisage_kernel::Result<CapabilityRegistry> {
    demo_catalog_with_cache(ToolCache::new(WEATHER_TTL))
}

/// Build the demo catalog around an existing weather cache.
pub fn demo_catalog_with_cache(
    weather_cache: ToolCache<ToolOutput>,
) -> agrisage_kernel::Result<CapabilityRegistry> {
    let handlers = Handlers::new(weather_cache);

    let crop_health = ToolDescriptor::new(
        "consult_crop_health_agent",
        "Ask the crop health agent (diseases, pests, treatments) a sub-question",
    )
    .with_schema(delegate_schema())
    .with_tags([IntentTag::DiseaseDiagnosis, IntentTag::PestId]);

    let compliance = ToolDescriptor::new(
        "consult_compliance_agent",
        "Ask the compliance agent (doses, buffer zones, deadlines) a sub-question",
    )
    .with_schema(delegate_schema())
    .with_tags([IntentTag::RegulatoryCheck]);

    RegistryBuilder::new()
        .register_shared(weather_descriptor(), Arc::clone(&handlers.weather))
        .register_shared(diagnose_descriptor(), Arc::clone(&handlers.diagnose))
        .register_shared(treatment_descriptor(), Arc::clone(&handlers.treatment))
        .register_shared(pest_descriptor(), Arc::clone(&handlers.pest))
        .register_shared(regulations_descriptor(), Arc::clone(&handlers.regulations))
        .register(rotation_descriptor(), FnHandler::new(plan_rotation))
        .register(sustainability_descriptor(), FnHandler::new(assess_sustainability))
        .register_delegate(crop_health, crop_health_scope(&handlers)?)
        .register_delegate(compliance, compliance_scope(&handlers)?)
        .build()
}
