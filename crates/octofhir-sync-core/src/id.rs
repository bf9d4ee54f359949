//! Resource id generation for locally created resources.

/// Generates a new client-assigned resource id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
