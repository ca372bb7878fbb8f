//! Image tag generation for published artifacts.
//!
//! Tags only need to be unlikely to collide; they are not secrets.

use dockhand_core::TagStrategy;
use rand::Rng;
use uuid::Uuid;

/// Placeholder replaced by the generated tag in an address template.
pub const TAG_PLACEHOLDER: &str = "{tag}";

/// Generate a fresh tag under `strategy`.
pub fn generate_tag(strategy: &TagStrategy) -> String {
    match strategy {
        TagStrategy::BoundedRandom { upper } => {
            rand::thread_rng().gen_range(0..(*upper).max(1)).to_string()
        }
        TagStrategy::Uuid => Uuid::new_v4().simple().to_string(),
    }
}

/// Substitute `tag` into `template`.
pub fn render_address(template: &str, tag: &str) -> String {
    template.replace(TAG_PLACEHOLDER, tag)
}

/// A fresh registry address for `template`.
pub fn next_address(template: &str, strategy: &TagStrategy) -> String {
    render_address(template, &generate_tag(strategy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn bounded_tags_stay_in_range() {
        let strategy = TagStrategy::BoundedRandom { upper: 10 };
        for _ in 0..200 {
            let tag: u64 = generate_tag(&strategy).parse().unwrap();
            assert!(tag < 10);
        }
    }

    #[test]
    fn default_tags_rarely_repeat() {
        let strategy = TagStrategy::default();
        let tags: HashSet<String> = (0..100).map(|_| generate_tag(&strategy)).collect();
        // 100 draws from 10^7 values collide with probability below 0.1%
        assert!(tags.len() >= 99);
    }

    #[test]
    fn uuid_tags_are_simple_hex() {
        let tag = generate_tag(&TagStrategy::Uuid);
        assert_eq!(tag.len(), 32);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn address_template_is_rendered() {
        assert_eq!(
            render_address("ttl.sh/hello-dagger-{tag}", "4242"),
            "ttl.sh/hello-dagger-4242"
        );
        let address = next_address("ttl.sh/hello-dagger-{tag}", &TagStrategy::default());
        assert!(address.starts_with("ttl.sh/hello-dagger-"));
        assert!(!address.contains(TAG_PLACEHOLDER));
    }
}
