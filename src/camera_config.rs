use serde::Deserialize;

pub const INTRINSIC_COEFF_COUNT: usize = 9;
pub const RECTIFICATION_COEFF_COUNT: usize = 9;
pub const PROJECTION_COEFF_COUNT: usize = 12;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CameraConfig {
    pub id: String,
    pub name: Option<String>, // falls back to the id
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub intrinsic_coeffs: Vec<f64>,
    pub distortion_coeffs: Vec<f64>,
    pub rectification_coeffs: Vec<f64>,
    pub projection_coeffs: Vec<f64>,
}

impl CameraConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&self.id)
    }
}

/// Number of distortion coefficients a model requires, if the model is known.
pub fn distortion_coeff_count(model: &str) -> Option<usize> {
    match model {
        "plumb_bob" => Some(5),
        "rational_polynomial" => Some(8),
        "equidistant" => Some(4),
        _ => None,
    }
}

/// Checks that a coefficient vector is either empty or exactly `expected` long.
pub fn check_coeff_len(label: &str, coeffs: &[f64], expected: Option<usize>) -> Result<(), String> {
    match expected {
        _ if coeffs.is_empty() => Ok(()),
        Some(n) if coeffs.len() != n => Err(format!(
            "{} must have {} coefficients or none, got {}",
            label,
            n,
            coeffs.len()
        )),
        _ => Ok(()),
    }
}
