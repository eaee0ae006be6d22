//! Well-known type and method names
//!
//! Types are slash-separated (`app/Worker`). Everything under the `sys/`
//! prefix belongs to the platform runtime; coroutine support types live
//! under `ravel/`.

/// Prefix of the platform runtime namespace
pub const PLATFORM_PREFIX: &str = "sys/";

/// Root of the type hierarchy
pub const OBJECT: &str = "sys/Object";

/// Root of all exception types
pub const THROWABLE: &str = "sys/Throwable";

/// Built-in string type
pub const STRING: &str = "sys/String";

/// Checked exception base class
pub const EXCEPTION: &str = "sys/Exception";

/// Unchecked exception base class
pub const RUNTIME_EXCEPTION: &str = "sys/RuntimeException";

/// Thrown when an operation is attempted in the wrong state
pub const ILLEGAL_STATE_EXCEPTION: &str = "sys/IllegalStateException";

/// Integer division by zero
pub const ARITHMETIC_EXCEPTION: &str = "sys/ArithmeticException";

/// Dereference of a null reference
pub const NULL_POINTER_EXCEPTION: &str = "sys/NullPointerException";

/// Failed `checkcast`
pub const CLASS_CAST_EXCEPTION: &str = "sys/ClassCastException";

/// Array index outside the array
pub const INDEX_OUT_OF_BOUNDS_EXCEPTION: &str = "sys/IndexOutOfBoundsException";

/// Array created with a negative length
pub const NEGATIVE_ARRAY_SIZE_EXCEPTION: &str = "sys/NegativeArraySizeException";

/// Fatal error base class
pub const ERROR: &str = "sys/Error";

/// Platform thread type (blocking operations)
pub const THREAD: &str = "sys/Thread";

/// Platform lock type (blocking operations)
pub const LOCK: &str = "sys/sync/Lock";

/// Owner of the suspend primitive
pub const COROUTINE: &str = "ravel/Coroutine";

/// Name of the suspend primitive
pub const YIELD_NAME: &str = "yield";

/// Descriptor of the suspend primitive
pub const YIELD_DESC: &str = "()V";

/// The suspension signal type
pub const SUSPEND_EXECUTION: &str = "ravel/SuspendExecution";

/// Marker attribute of already transformed units
pub const INSTRUMENTED_MARKER: &str = "ravel/Instrumented";

/// Constructor method name
pub const CONSTRUCTOR: &str = "<init>";

/// Static initializer method name
pub const STATIC_INITIALIZER: &str = "<clinit>";

/// Check whether a type belongs to the platform runtime namespace
#[inline]
pub fn is_platform_type(name: &str) -> bool {
    name.starts_with(PLATFORM_PREFIX)
}

/// Check whether a method name denotes a constructor or initializer
#[inline]
pub fn is_special_method(name: &str) -> bool {
    name.starts_with('<')
}

/// Check whether `(owner, name, desc)` is the suspend primitive
pub fn is_yield(owner: &str, name: &str, desc: &str) -> bool {
    owner == COROUTINE && name == YIELD_NAME && desc == YIELD_DESC
}
