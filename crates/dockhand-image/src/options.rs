//! Per-call image resolution settings.

use dockhand_common::error::{ConfigError, Validator};

use crate::context::BuildContext;

/// How an image should be made available.
///
/// With a build context the image is built (when missing, or always when
/// `force_rebuild` is set); without one it is pulled from its registry and
/// `force_rebuild` has no effect.
#[derive(Debug, Default)]
pub struct ImageOptions {
    /// Archive to build the image from.
    pub build_context: Option<BuildContext>,
    /// Rebuild even if an image with the same name already exists.
    pub force_rebuild: bool,
}

impl ImageOptions {
    /// Options that pull the image from its registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the image from `context` instead of pulling it.
    #[must_use]
    pub fn build(mut self, context: BuildContext) -> Self {
        self.build_context = Some(context);
        self
    }

    /// Sets whether an existing image is rebuilt anyway.
    #[must_use]
    pub const fn force_rebuild(mut self, force: bool) -> Self {
        self.force_rebuild = force;
        self
    }

    /// Checks the options against the image `name` they will resolve.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] listing every problem found.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let mut v = Validator::new();
        let _ = v
            .check(!name.trim().is_empty(), || "image name must not be empty".into())
            .check(!name.chars().any(char::is_whitespace), || {
                format!("image name `{name}` must not contain whitespace")
            });
        let repository = dockhand_engine::types::split_reference(name).0;
        let _ = v.check(!repository.chars().any(char::is_uppercase), || {
            format!("repository in `{name}` must be lowercase")
        });
        let _ = v.check(
            !self.build_context.as_ref().is_some_and(BuildContext::is_empty),
            || "build context must not be empty".into(),
        );
        v.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_options_for_plain_name_are_valid() {
        assert!(ImageOptions::new().validate("alpine:3.20").is_ok());
    }

    #[test]
    fn tag_case_is_not_checked() {
        assert!(ImageOptions::new().validate("registry.local/app:Release").is_ok());
    }

    #[test]
    fn every_problem_is_reported_at_once() {
        let err = ImageOptions::new().validate("My Image").unwrap_err();
        assert_eq!(err.problems.len(), 2);
    }

    #[test]
    fn forced_build_with_context_is_valid() {
        let ctx = BuildContext::from_dockerfile("FROM scratch\n").expect("pack");
        assert!(ImageOptions::new().build(ctx).force_rebuild(true).validate("app").is_ok());
    }

    #[test]
    fn empty_context_is_rejected() {
        let ctx = BuildContext::from_bytes(Vec::new());
        assert!(ImageOptions::new().build(ctx).validate("app").is_err());
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(ImageOptions::new().validate("").is_err());
    }
}
