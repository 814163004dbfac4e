use crate::message::StreamMessage;

/// Side effects around a store (metrics, secondary indexing, ...).
///
/// `before_store` runs for every message before conversion.
/// `after_store` runs only after a successful write, with the record
/// that was stored; never for a dropped or failed message.
pub trait StoreHooks<R>: Send + Sync {
    fn before_store(&self, _message: &StreamMessage) {}

    fn after_store(&self, _message: &StreamMessage, _stored: &R) {}
}

/// No side effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl<R> StoreHooks<R> for NoopHooks {}

type BeforeFn = Box<dyn Fn(&StreamMessage) + Send + Sync>;
type AfterFn<R> = Box<dyn Fn(&StreamMessage, &R) + Send + Sync>;

/// Hooks from closures. Unset closures behave like [`NoopHooks`].
pub struct FnHooks<R> {
    before: Option<BeforeFn>,
    after: Option<AfterFn<R>>,
}

impl<R> FnHooks<R> {
    pub fn new() -> Self {
        Self {
            before: None,
            after: None,
        }
    }

    pub fn before(mut self, f: impl Fn(&StreamMessage) + Send + Sync + 'static) -> Self {
        self.before = Some(Box::new(f));
        self
    }

    pub fn after(mut self, f: impl Fn(&StreamMessage, &R) + Send + Sync + 'static) -> Self {
        self.after = Some(Box::new(f));
        self
    }
}

impl<R> Default for FnHooks<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> StoreHooks<R> for FnHooks<R>
where
    R: Send + Sync,
{
    fn before_store(&self, message: &StreamMessage) {
        if let Some(f) = &self.before {
            f(message);
        }
    }

    fn after_store(&self, message: &StreamMessage, stored: &R) {
        if let Some(f) = &self.after {
            f(message, stored);
        }
    }
}
