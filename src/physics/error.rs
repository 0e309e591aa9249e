/// Errors produced when creating or modifying objects in the physics world.
///
/// All of these indicate programmer errors rather than conditions
/// that arise from the simulation itself.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PhysicsError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Attempted to use a {0} that has already been destroyed")]
    UseAfterDestroy(&'static str),
}

pub type Result<T> = std::result::Result<T, PhysicsError>;

/// Check that a value is finite and within an inclusive range,
/// producing an `InvalidConfiguration` error naming the field otherwise.
pub(crate) fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(PhysicsError::InvalidConfiguration(format!(
            "{name} must be in [{min}, {max}], got {value}"
        )))
    }
}
