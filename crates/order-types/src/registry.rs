//! Registry trait for self-registering implementations.

/// Base trait for implementation registries.
///
/// Each pluggable backend module (storage, notifier) provides a `Registry`
/// struct implementing this trait, tying the name used under
/// `[<section>.implementations.<name>]` to the factory that builds it.
pub trait ImplementationRegistry {
	/// Configuration name, e.g. `"memory"` for `storage.implementations.memory`.
	const NAME: &'static str;

	/// Factory function type for this kind of backend.
	type Factory;

	/// Returns the factory function for this implementation.
	fn factory() -> Self::Factory;
}
