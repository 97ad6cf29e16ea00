//! Example services used to populate an empty store

use crate::service::{Lifecycle, ServiceDraft};

pub fn example_services() -> Vec<ServiceDraft> {
    vec![
        ServiceDraft {
            name: "API Gateway".to_string(),
            url: "https://api.example.com".to_string(),
            description: "Main API service".to_string(),
            status: Lifecycle::Production,
            ip: "10.0.1.100".to_string(),
            cloud_provider: "AWS".to_string(),
            monthly_cost: 150.0,
            supported_by: "Platform Team".to_string(),
        },
        ServiceDraft {
            name: "Auth Service".to_string(),
            url: "https://auth.example.com".to_string(),
            description: "Authentication service".to_string(),
            status: Lifecycle::Staging,
            ip: "10.0.1.101".to_string(),
            cloud_provider: "Google Cloud".to_string(),
            monthly_cost: 75.0,
            supported_by: "Security Team".to_string(),
        },
        ServiceDraft {
            name: "CDN".to_string(),
            url: "https://cdn.example.com".to_string(),
            description: "Content delivery".to_string(),
            status: Lifecycle::Production,
            ip: "10.0.1.102".to_string(),
            cloud_provider: "Cloudflare".to_string(),
            monthly_cost: 25.0,
            supported_by: "Infrastructure Team".to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_examples_are_valid() {
        let examples = example_services();
        assert_eq!(examples.len(), 3);
        for draft in &examples {
            assert!(draft.validate().is_ok(), "{} should validate", draft.name);
        }
    }
}
