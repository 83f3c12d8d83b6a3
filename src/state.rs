//! Observable session state
//!
//! A state schema is a plain struct of [`StateField`]s implementing
//! [`StateSchema`]. Each session gets its own schema instance, bound to that
//! session's notification channel. Mutating a field pushes the ids of every
//! fragment registered against it; reading never notifies.
//!
//! ```ignore
//! struct AppState {
//!     count: StateField<i64>,
//!     label: StateField<String>,
//! }
//!
//! impl StateSchema for AppState {
//!     fn fields(&self) -> Vec<&dyn ObservableField> {
//!         vec![&self.count as &dyn ObservableField, &self.label]
//!     }
//! }
//! ```

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, trace, warn};

use crate::channel::Notifier;
use crate::fragment::FragmentId;
use crate::render;

/// Type-erased view of a state field, used for registration and binding
pub trait ObservableField: Send + Sync {
    fn name(&self) -> &'static str;

    /// Add a fragment to the notification set. Returns false if it was
    /// already registered.
    fn register(&self, fragment_id: FragmentId) -> bool;

    /// Registered fragment ids, in registration order
    fn subscribers(&self) -> Vec<FragmentId>;

    /// Attach the owning session's channel. A field binds at most once.
    fn bind(&self, notifier: Notifier);

    fn is_bound(&self) -> bool;
}

struct FieldInner<T> {
    value: T,
    subscribers: Vec<FragmentId>,
}

/// A named, typed, observable value
pub struct StateField<T> {
    name: &'static str,
    inner: Mutex<FieldInner<T>>,
    notifier: OnceLock<Notifier>,
}

impl<T> StateField<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            inner: Mutex::new(FieldInner {
                value,
                subscribers: Vec::new(),
            }),
            notifier: OnceLock::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FieldInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> T {
        self.lock().value.clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.lock().value)
    }

    /// Replace the value. When it differs from the current one, every
    /// registered fragment id is enqueued before this returns.
    ///
    /// Returns the number of ids pushed.
    pub fn set(&self, value: T) -> usize {
        let targets = {
            let mut inner = self.lock();
            if inner.value == value {
                return 0;
            }
            inner.value = value;
            inner.subscribers.clone()
        };
        self.notify(&targets)
    }

    /// Mutate in place; notifies like [`StateField::set`] if the value changed
    pub fn update(&self, f: impl FnOnce(&mut T)) -> usize {
        let targets = {
            let mut inner = self.lock();
            let before = inner.value.clone();
            f(&mut inner.value);
            if inner.value == before {
                return 0;
            }
            inner.subscribers.clone()
        };
        self.notify(&targets)
    }

    fn notify(&self, targets: &[FragmentId]) -> usize {
        let Some(notifier) = self.notifier.get() else {
            trace!(field = self.name, "field not bound to a session, skipping notify");
            return 0;
        };

        // A fragment writing a field it depends on must not schedule itself
        let rendering = render::current_rendering();
        let mut pushed = 0;
        for id in targets {
            if rendering.as_ref() == Some(id) {
                debug!(field = self.name, fragment = %id, "skipping self-notification during render");
                continue;
            }
            if notifier.push(id.clone()) {
                pushed += 1;
            }
        }
        pushed
    }
}

impl<T> ObservableField for StateField<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn register(&self, fragment_id: FragmentId) -> bool {
        let mut inner = self.lock();
        if inner.subscribers.contains(&fragment_id) {
            return false;
        }
        inner.subscribers.push(fragment_id);
        true
    }

    fn subscribers(&self) -> Vec<FragmentId> {
        self.lock().subscribers.clone()
    }

    fn bind(&self, notifier: Notifier) {
        if let Err(rejected) = self.notifier.set(notifier) {
            let same = self
                .notifier
                .get()
                .is_some_and(|bound| bound.same_channel(&rejected));
            if !same {
                warn!(field = self.name, "field already bound to another session");
            }
        }
    }

    fn is_bound(&self) -> bool {
        self.notifier.get().is_some()
    }
}

/// A user-defined collection of state fields, in declaration order
pub trait StateSchema: Send + Sync + 'static {
    fn fields(&self) -> Vec<&dyn ObservableField>;
}

/// One session's state: a schema instance plus typed access to it
#[derive(Clone)]
pub struct State {
    schema: Arc<dyn StateSchema>,
    typed: Arc<dyn Any + Send + Sync>,
}

impl State {
    pub fn new<S: StateSchema>(schema: S) -> Self {
        let schema = Arc::new(schema);
        Self {
            schema: schema.clone(),
            typed: schema,
        }
    }

    /// Bind every field to the owning session's channel
    pub fn bind(&self, notifier: &Notifier) {
        for field in self.schema.fields() {
            field.bind(notifier.clone());
        }
    }

    pub fn field(&self, name: &str) -> Option<&dyn ObservableField> {
        self.schema.fields().into_iter().find(|f| f.name() == name)
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.schema.fields().iter().map(|f| f.name()).collect()
    }

    /// Typed access to the concrete schema
    pub fn downcast<S: StateSchema>(&self) -> Option<Arc<S>> {
        self.typed.clone().downcast::<S>().ok()
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("fields", &self.field_names())
            .finish()
    }
}
