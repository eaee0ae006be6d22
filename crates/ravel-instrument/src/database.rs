//! Suspendability knowledge base
//!
//! Answers "is this call target suspendable?" by walking the declaring
//! type's ancestor chain. Facts are loaded lazily through a
//! [`ClassResolver`] and kept for the lifetime of the database; a type that
//! cannot be resolved is recorded as not found and every lookup through it
//! fails open (suspendable).

use crate::class::check_unit;
use crate::log::{Log, LogLevel, TracingLog};
use crate::options::InstrumentOptions;
use crate::InstrumentResult;
use parking_lot::Mutex;
use ravel_bytecode::{names, ClassUnit};
use rustc_hash::FxHashMap;
use std::fmt;

/// Source of class metadata for types outside the current batch
pub trait ClassResolver: Send + Sync {
    /// Load the unit named `name`, if it exists
    fn resolve(&self, name: &str) -> Option<ClassUnit>;
}

impl<F> ClassResolver for F
where
    F: Fn(&str) -> Option<ClassUnit> + Send + Sync,
{
    fn resolve(&self, name: &str) -> Option<ClassUnit> {
        self(name)
    }
}

/// Resolver that knows no classes
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResolver;

impl ClassResolver for NoResolver {
    fn resolve(&self, _name: &str) -> Option<ClassUnit> {
        None
    }
}

/// Suspendability facts of one class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassEntry {
    super_name: Option<String>,
    methods: FxHashMap<String, bool>,
}

impl ClassEntry {
    /// Empty entry with the given ancestor
    pub fn new(super_name: Option<String>) -> Self {
        Self {
            super_name,
            methods: FxHashMap::default(),
        }
    }

    /// Facts of every method declared by `unit`; bodies are not inspected
    pub fn from_unit(unit: &ClassUnit) -> Self {
        let mut entry = Self::new(unit.super_name.clone());
        for method in &unit.methods {
            entry.set(
                &method.name,
                &method.desc,
                method.declares(names::SUSPEND_EXECUTION),
            );
        }
        entry
    }

    /// Record one method
    pub fn set(&mut self, name: &str, desc: &str, suspendable: bool) {
        self.methods.insert(key(name, desc), suspendable);
    }

    /// Recorded flag of a method declared by this class
    pub fn check(&self, name: &str, desc: &str) -> Option<bool> {
        self.methods.get(&key(name, desc)).copied()
    }

    /// Direct ancestor
    pub fn super_name(&self) -> Option<&str> {
        self.super_name.as_deref()
    }

    /// Whether any declared method is suspendable
    pub fn has_suspendable(&self) -> bool {
        self.methods.values().any(|s| *s)
    }
}

fn key(name: &str, desc: &str) -> String {
    let mut k = String::with_capacity(name.len() + desc.len());
    k.push_str(name);
    k.push_str(desc);
    k
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Fact {
    Known(ClassEntry),
    NotFound,
}

/// Ancestors of the platform types the runtime provides
const PLATFORM_SUPERS: &[(&str, &str)] = &[
    (names::THROWABLE, names::OBJECT),
    (names::EXCEPTION, names::THROWABLE),
    (names::RUNTIME_EXCEPTION, names::EXCEPTION),
    (names::ILLEGAL_STATE_EXCEPTION, names::RUNTIME_EXCEPTION),
    (names::ARITHMETIC_EXCEPTION, names::RUNTIME_EXCEPTION),
    (names::NULL_POINTER_EXCEPTION, names::RUNTIME_EXCEPTION),
    (names::CLASS_CAST_EXCEPTION, names::RUNTIME_EXCEPTION),
    (names::INDEX_OUT_OF_BOUNDS_EXCEPTION, names::RUNTIME_EXCEPTION),
    (names::NEGATIVE_ARRAY_SIZE_EXCEPTION, names::RUNTIME_EXCEPTION),
    (names::ERROR, names::THROWABLE),
    (names::STRING, names::OBJECT),
    (names::THREAD, names::OBJECT),
];

/// Memoizing suspendability database
pub struct MethodDatabase {
    resolver: Box<dyn ClassResolver>,
    log: Box<dyn Log>,
    options: InstrumentOptions,
    log_mask: u8,
    classes: Mutex<FxHashMap<String, Fact>>,
    super_classes: Mutex<FxHashMap<String, String>>,
    work_list: Mutex<Vec<String>>,
}

impl MethodDatabase {
    /// Create a database with no resolver that logs through `tracing`
    pub fn new(options: InstrumentOptions) -> Self {
        let mut db = Self {
            resolver: Box::new(NoResolver),
            log: Box::new(TracingLog),
            options,
            log_mask: 0,
            classes: Mutex::new(FxHashMap::default()),
            super_classes: Mutex::new(FxHashMap::default()),
            work_list: Mutex::new(Vec::new()),
        };
        db.log_mask = Self::mask_for(&options);
        db.seed_runtime_types();
        db
    }

    /// Use `resolver` for types outside the batch
    pub fn with_resolver(mut self, resolver: impl ClassResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Send diagnostics to `log`
    pub fn with_log(mut self, log: impl Log + 'static) -> Self {
        self.log = Box::new(log);
        self
    }

    fn mask_for(options: &InstrumentOptions) -> u8 {
        let mut mask = LogLevel::Warning.bit();
        if options.verbose || options.debug {
            mask |= LogLevel::Info.bit();
        }
        if options.debug {
            mask |= LogLevel::Debug.bit();
        }
        mask
    }

    fn seed_runtime_types(&self) {
        let mut coroutine = ClassEntry::new(Some(names::OBJECT.to_string()));
        coroutine.set(names::YIELD_NAME, names::YIELD_DESC, true);
        let signal = ClassEntry::new(Some(names::EXCEPTION.to_string()));

        let mut classes = self.classes.lock();
        classes.insert(names::COROUTINE.to_string(), Fact::Known(coroutine));
        classes.insert(names::SUSPEND_EXECUTION.to_string(), Fact::Known(signal));
        drop(classes);

        let mut supers = self.super_classes.lock();
        for (class, parent) in PLATFORM_SUPERS {
            supers.insert(class.to_string(), parent.to_string());
        }
    }

    // ===== Options & Diagnostics =====

    /// Active options
    pub fn options(&self) -> &InstrumentOptions {
        &self.options
    }

    /// Whether debug diagnostics are enabled
    pub fn is_debug(&self) -> bool {
        self.options.debug
    }

    /// Whether known blocking calls are accepted
    pub fn is_allow_blocking(&self) -> bool {
        self.options.allow_blocking
    }

    /// Whether monitors are accepted in transformed methods
    pub fn is_allow_monitors(&self) -> bool {
        self.options.allow_monitors
    }

    /// Whether messages at `level` reach the sink
    pub fn is_enabled(&self, level: LogLevel) -> bool {
        self.log_mask & level.bit() != 0
    }

    /// Log a message if its level is enabled
    pub fn log(&self, level: LogLevel, msg: fmt::Arguments<'_>) {
        if self.is_enabled(level) {
            self.log.log(level, &msg.to_string());
        }
    }

    /// Report a failure with its cause
    pub fn error(&self, msg: &str, cause: &dyn std::error::Error) {
        self.log.error(msg, cause);
    }

    // ===== Check Pass =====

    /// Record the facts of a unit from the batch and queue it if it needs work
    ///
    /// Returns whether the unit was queued.
    ///
    /// # Errors
    ///
    /// Fails for a suspendable `synchronized` method.
    pub fn check_class(&self, unit: &ClassUnit) -> InstrumentResult<bool> {
        let check = check_unit(unit)?;
        self.record_suspendable_methods(&unit.name, check.entry);

        if !check.needs_instrumentation {
            return Ok(false);
        }
        if check.already_instrumented && !self.options.force {
            self.log(
                LogLevel::Info,
                format_args!("Found instrumented class: {}", unit.name),
            );
            return Ok(false);
        }
        self.log(LogLevel::Info, format_args!("Found class: {}", unit.name));
        self.work_list.lock().push(unit.name.clone());
        Ok(true)
    }

    /// Names queued by [`MethodDatabase::check_class`]
    pub fn work_list(&self) -> Vec<String> {
        self.work_list.lock().clone()
    }

    /// Record the facts of a class, warning if they contradict earlier ones
    pub fn record_suspendable_methods(&self, class: &str, entry: ClassEntry) {
        self.record(class, Fact::Known(entry));
    }

    fn record(&self, class: &str, fact: Fact) {
        let old = self.classes.lock().insert(class.to_string(), fact.clone());
        if let Some(old) = old {
            if old != fact {
                self.log(
                    LogLevel::Warning,
                    format_args!(
                        "Duplicate class entries with different data for class: {}",
                        class
                    ),
                );
            }
        }
    }

    fn fact(&self, class: &str) -> Option<Fact> {
        self.classes.lock().get(class).cloned()
    }

    // ===== Lookups =====

    /// Whether a call to `class.method desc` may suspend
    ///
    /// Special methods and platform types are never suspendable, including
    /// platform methods reached through a user type's ancestors. With
    /// `search_super` the ancestor chain is walked until a declaration is
    /// found; unknown types and exhausted chains answer `true`.
    pub fn is_method_suspendable(
        &self,
        class: &str,
        method: &str,
        desc: &str,
        search_super: bool,
    ) -> bool {
        if names::is_special_method(method) || names::is_platform_type(class) {
            return false;
        }

        let mut current = Some(class.to_string());
        while let Some(name) = current {
            // platform methods inherited by user types never suspend
            if names::is_platform_type(&name) {
                return false;
            }
            let fact = match self.fact(&name) {
                Some(fact) => fact,
                None => {
                    self.log(
                        LogLevel::Info,
                        format_args!("Trying to read class: {}", name),
                    );
                    let fact = match self.resolver.resolve(&name) {
                        Some(unit) => Fact::Known(ClassEntry::from_unit(&unit)),
                        None => {
                            self.log(
                                LogLevel::Warning,
                                format_args!("Class not found assuming suspendable: {}", name),
                            );
                            Fact::NotFound
                        }
                    };
                    self.record(&name, fact.clone());
                    fact
                }
            };

            let entry = match fact {
                Fact::NotFound => return true,
                Fact::Known(entry) => entry,
            };
            if let Some(suspendable) = entry.check(method, desc) {
                return suspendable;
            }
            if !search_super {
                break;
            }
            current = entry.super_name;
        }

        self.log(
            LogLevel::Warning,
            format_args!(
                "Method not found in class - assuming suspendable: {}#{}{}",
                class, method, desc
            ),
        );
        true
    }

    /// Direct ancestor of `class`, resolving it if needed
    pub fn direct_super_class(&self, class: &str) -> Option<String> {
        if let Some(Fact::Known(entry)) = self.fact(class) {
            return entry.super_name;
        }
        if let Some(parent) = self.super_classes.lock().get(class) {
            return Some(parent.clone());
        }

        let parent = self.resolver.resolve(class)?.super_name?;
        let old = self
            .super_classes
            .lock()
            .insert(class.to_string(), parent.clone());
        if let Some(old) = old {
            if old != parent {
                self.log(
                    LogLevel::Warning,
                    format_args!(
                        "Duplicate super class entry with different value: {} vs {}",
                        old, parent
                    ),
                );
            }
        }
        Some(parent)
    }

    /// Ancestor chain from `sys/Object` down to `class`
    fn super_chain(&self, class: &str) -> Option<Vec<String>> {
        let mut chain = vec![class.to_string()];
        let mut current = class.to_string();
        while current != names::OBJECT {
            match self.direct_super_class(&current) {
                Some(parent) => {
                    chain.push(parent.clone());
                    current = parent;
                }
                None => {
                    self.log(
                        LogLevel::Warning,
                        format_args!("Can't determine super class of {}", current),
                    );
                    return None;
                }
            }
        }
        chain.reverse();
        Some(chain)
    }

    /// Most specific common ancestor of two classes
    pub fn common_super_class(&self, a: &str, b: &str) -> Option<String> {
        let chain_a = self.super_chain(a)?;
        let chain_b = self.super_chain(b)?;
        chain_a
            .iter()
            .zip(chain_b.iter())
            .take_while(|(x, y)| x == y)
            .last()
            .map(|(x, _)| x.clone())
    }

    /// Whether `class` descends from `sys/Throwable`
    pub fn is_exception(&self, class: &str) -> bool {
        let mut current = class.to_string();
        loop {
            if current == names::THROWABLE {
                return true;
            }
            if current == names::OBJECT {
                return false;
            }
            match self.direct_super_class(&current) {
                Some(parent) => current = parent,
                None => {
                    self.log(
                        LogLevel::Warning,
                        format_args!("Can't determine super class of {}", current),
                    );
                    return false;
                }
            }
        }
    }
}

impl fmt::Debug for MethodDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDatabase")
            .field("options", &self.options)
            .field("classes", &self.classes.lock().len())
            .field("work_list", &self.work_list.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::CapturingLog;
    use ravel_bytecode::{access, ClassBuilder};
    use std::sync::Arc;

    fn base_unit() -> ClassUnit {
        ClassBuilder::new("app/Base")
            .method("step", "()V", access::PUBLIC, |m| {
                m.throws(names::SUSPEND_EXECUTION).ret();
            })
            .method("plain", "()V", access::PUBLIC, |m| {
                m.ret();
            })
            .build()
    }

    fn derived_unit() -> ClassUnit {
        ClassBuilder::new("app/Derived")
            .extends("app/Base")
            .method("other", "()V", access::PUBLIC, |m| {
                m.ret();
            })
            .build()
    }

    #[test]
    fn test_special_and_platform_methods() {
        let db = MethodDatabase::new(InstrumentOptions::default());
        assert!(!db.is_method_suspendable("app/A", "<init>", "()V", true));
        assert!(!db.is_method_suspendable(names::THREAD, "run", "()V", true));
        assert!(db.is_method_suspendable(names::COROUTINE, "yield", "()V", true));
    }

    #[test]
    fn test_inherited_lookup() {
        let db = MethodDatabase::new(InstrumentOptions::default());
        db.check_class(&base_unit()).unwrap();
        db.check_class(&derived_unit()).unwrap();
        assert!(db.is_method_suspendable("app/Derived", "step", "()V", true));
        assert!(!db.is_method_suspendable("app/Derived", "plain", "()V", true));
        assert!(!db.is_method_suspendable("app/Derived", "other", "()V", true));
    }

    #[test]
    fn test_inherited_platform_methods_are_not_suspendable() {
        let log = Arc::new(CapturingLog::new());
        let db = MethodDatabase::new(InstrumentOptions::default()).with_log(Arc::clone(&log));
        let failure = ClassBuilder::new("app/Failure")
            .extends(names::RUNTIME_EXCEPTION)
            .build();
        let plain = ClassBuilder::new("app/Plain").build();
        db.check_class(&failure).unwrap();
        db.check_class(&plain).unwrap();

        assert!(!db.is_method_suspendable(
            "app/Failure",
            "getMessage",
            "()Lsys/String;",
            true
        ));
        assert!(!db.is_method_suspendable("app/Plain", "hashCode", "()I", true));
        assert!(log.messages(LogLevel::Warning).is_empty());
    }

    #[test]
    fn test_no_super_search() {
        let log = Arc::new(CapturingLog::new());
        let db = MethodDatabase::new(InstrumentOptions::default()).with_log(Arc::clone(&log));
        db.check_class(&derived_unit()).unwrap();
        // not declared by app/Derived itself, so fail open
        assert!(db.is_method_suspendable("app/Derived", "plain", "()V", false));
        assert!(log.messages(LogLevel::Warning)[0].contains("Method not found"));
    }

    #[test]
    fn test_unknown_class_fails_open() {
        let log = Arc::new(CapturingLog::new());
        let db = MethodDatabase::new(InstrumentOptions::default()).with_log(Arc::clone(&log));
        assert!(db.is_method_suspendable("lib/Missing", "run", "()V", true));
        assert!(db.is_method_suspendable("lib/Missing", "other", "()V", true));
        let warnings = log.messages(LogLevel::Warning);
        // cached after the first miss
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("lib/Missing"));
    }

    #[test]
    fn test_resolver_is_consulted_lazily() {
        let db = MethodDatabase::new(InstrumentOptions::default()).with_resolver(
            |name: &str| match name {
                "app/Base" => Some(base_unit()),
                _ => None,
            },
        );
        db.check_class(&derived_unit()).unwrap();
        assert!(db.is_method_suspendable("app/Derived", "step", "()V", true));
        assert!(!db.is_method_suspendable("app/Base", "plain", "()V", true));
    }

    #[test]
    fn test_work_list() {
        let db = MethodDatabase::new(InstrumentOptions::default());
        assert!(db.check_class(&base_unit()).unwrap());
        assert!(!db.check_class(&derived_unit()).unwrap());
        let marked = ClassBuilder::new("app/Done")
            .marker(names::INSTRUMENTED_MARKER)
            .method("step", "()V", access::PUBLIC, |m| {
                m.throws(names::SUSPEND_EXECUTION).ret();
            })
            .build();
        assert!(!db.check_class(&marked).unwrap());
        assert_eq!(db.work_list(), vec!["app/Base".to_string()]);
    }

    #[test]
    fn test_duplicate_entries_warn() {
        let log = Arc::new(CapturingLog::new());
        let db = MethodDatabase::new(InstrumentOptions::default()).with_log(Arc::clone(&log));
        db.check_class(&base_unit()).unwrap();
        db.check_class(&base_unit()).unwrap();
        assert!(log.messages(LogLevel::Warning).is_empty());
        let changed = ClassBuilder::new("app/Base").build();
        db.check_class(&changed).unwrap();
        assert_eq!(log.messages(LogLevel::Warning).len(), 1);
    }

    #[test]
    fn test_hierarchy_queries() {
        let db = MethodDatabase::new(InstrumentOptions::default());
        db.check_class(&base_unit()).unwrap();
        db.check_class(&derived_unit()).unwrap();
        db.check_class(
            &ClassBuilder::new("app/Failure")
                .extends(names::RUNTIME_EXCEPTION)
                .build(),
        )
        .unwrap();

        assert_eq!(
            db.common_super_class("app/Derived", "app/Base"),
            Some("app/Base".to_string())
        );
        assert_eq!(
            db.common_super_class("app/Derived", "app/Failure"),
            Some(names::OBJECT.to_string())
        );
        assert!(db.is_exception("app/Failure"));
        assert!(db.is_exception(names::SUSPEND_EXECUTION));
        assert!(!db.is_exception("app/Derived"));
    }

    #[test]
    fn test_log_mask() {
        let log = Arc::new(CapturingLog::new());
        let db = MethodDatabase::new(InstrumentOptions::default()).with_log(Arc::clone(&log));
        db.log(LogLevel::Debug, format_args!("hidden"));
        db.log(LogLevel::Info, format_args!("hidden"));
        db.log(LogLevel::Warning, format_args!("shown"));
        assert_eq!(log.entries().len(), 1);

        let verbose = InstrumentOptions {
            verbose: true,
            ..Default::default()
        };
        let db = MethodDatabase::new(verbose);
        assert!(db.is_enabled(LogLevel::Info));
        assert!(!db.is_enabled(LogLevel::Debug));
    }
}
