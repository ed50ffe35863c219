//! BMI calculator.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp::registry::{CollaboratorError, RegisteredTool, ToolBuilder};
use crate::mcp::schema::{FieldSpec, InputSchema};

#[derive(Debug, Deserialize)]
struct BmiParams {
    height_meters: f64,
    weight_kg: f64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct BmiResult {
    pub bmi: f64,
    pub category: &'static str,
}

pub fn calculate_bmi_tool() -> RegisteredTool {
    ToolBuilder::new("calculate_bmi")
        .description("Calculate body mass index from height and weight, with its WHO category")
        .input_schema(
            InputSchema::new()
                .field(
                    "height_meters",
                    FieldSpec::number().required().describe("Height in meters"),
                )
                .field(
                    "weight_kg",
                    FieldSpec::number().required().describe("Weight in kilograms"),
                ),
        )
        .cacheable(false)
        .build_fn(calculate_bmi_handler)
}

async fn calculate_bmi_handler(args: Value) -> Result<Value, CollaboratorError> {
    let params: BmiParams = serde_json::from_value(args)?;
    let result = calculate_bmi(params.height_meters, params.weight_kg)?;
    Ok(serde_json::to_value(result)?)
}

pub fn calculate_bmi(height_meters: f64, weight_kg: f64) -> Result<BmiResult, CollaboratorError> {
    if !(height_meters.is_finite() && height_meters > 0.0) {
        return Err(CollaboratorError::InvalidArguments(
            "height_meters must be a positive number".to_string(),
        ));
    }
    if !(weight_kg.is_finite() && weight_kg > 0.0) {
        return Err(CollaboratorError::InvalidArguments(
            "weight_kg must be a positive number".to_string(),
        ));
    }

    let bmi = weight_kg / (height_meters * height_meters);
    Ok(BmiResult {
        bmi: (bmi * 100.0).round() / 100.0,
        category: category(bmi),
    })
}

fn category(bmi: f64) -> &'static str {
    if bmi < 18.5 {
        "Underweight"
    } else if bmi < 25.0 {
        "Normal weight"
    } else if bmi < 30.0 {
        "Overweight"
    } else {
        "Obese"
    }
}
