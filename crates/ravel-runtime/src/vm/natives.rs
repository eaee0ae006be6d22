//! Built-in platform classes and host natives

use super::Vm;
use crate::suspend;
use crate::value::Value;
use crate::{VmError, VmResult};
use ravel_bytecode::{access, names, ClassBuilder, ClassUnit, MethodDef};
use std::time::Duration;

/// Register the built-in classes and natives with `vm`
pub(super) fn install(vm: &Vm) {
    for unit in builtin_classes() {
        vm.register(unit);
    }

    // suspend primitive, reached only by code that was never instrumented
    vm.register_native(names::COROUTINE, names::YIELD_NAME, names::YIELD_DESC, |_, _| {
        suspend::yield_uninstrumented().map(|()| None)
    });

    install_string_natives(vm);

    vm.register_native(names::THREAD, "sleep", "(J)V", |_, args| {
        let millis = long_arg(args, 0)?;
        let millis = u64::try_from(millis)
            .map_err(|_| VmError::IllegalArgument("timeout value is negative".to_string()))?;
        std::thread::sleep(Duration::from_millis(millis));
        Ok(None)
    });
}

fn throwable_class(name: &str, parent: &str) -> ClassUnit {
    let message_ctor = |m: &mut ravel_bytecode::MethodBuilder| {
        m.aload(0)
            .aload(1)
            .invoke_special(parent, names::CONSTRUCTOR, "(Lsys/String;)V")
            .ret();
    };
    ClassBuilder::new(name)
        .extends(parent)
        .default_constructor()
        .method(names::CONSTRUCTOR, "(Lsys/String;)V", access::PUBLIC, message_ctor)
        .build()
}

fn builtin_classes() -> Vec<ClassUnit> {
    let object = {
        let mut unit = ClassUnit::new(names::OBJECT, None);
        unit.access = access::PUBLIC;
        unit.methods.push(MethodDef {
            name: names::CONSTRUCTOR.to_string(),
            desc: "()V".to_string(),
            access: access::PUBLIC,
            throws: Vec::new(),
            max_locals: 1,
            code: vec![ravel_bytecode::Instr::Simple(ravel_bytecode::Opcode::Return)],
            handlers: Vec::new(),
        });
        unit
    };

    let throwable = ClassBuilder::new(names::THROWABLE)
        .field("message", "Lsys/String;")
        .default_constructor()
        .method(names::CONSTRUCTOR, "(Lsys/String;)V", access::PUBLIC, |m| {
            m.aload(0)
                .invoke_special(names::OBJECT, names::CONSTRUCTOR, "()V")
                .aload(0)
                .aload(1)
                .put_field(names::THROWABLE, "message", "Lsys/String;")
                .ret();
        })
        .method("getMessage", "()Lsys/String;", access::PUBLIC, |m| {
            m.aload(0)
                .get_field(names::THROWABLE, "message", "Lsys/String;")
                .areturn();
        })
        .build();

    let coroutine = ClassBuilder::new(names::COROUTINE)
        .access(access::PUBLIC | access::FINAL)
        .method(
            names::YIELD_NAME,
            names::YIELD_DESC,
            access::PUBLIC | access::STATIC | access::NATIVE,
            |m| {
                m.throws(names::SUSPEND_EXECUTION);
            },
        )
        .build();

    let string = ClassBuilder::new(names::STRING)
        .access(access::PUBLIC | access::FINAL)
        .build();
    let thread = ClassBuilder::new(names::THREAD).default_constructor().build();

    vec![
        object,
        throwable,
        throwable_class(names::EXCEPTION, names::THROWABLE),
        throwable_class(names::RUNTIME_EXCEPTION, names::EXCEPTION),
        throwable_class(names::ILLEGAL_STATE_EXCEPTION, names::RUNTIME_EXCEPTION),
        throwable_class(names::ARITHMETIC_EXCEPTION, names::RUNTIME_EXCEPTION),
        throwable_class(names::NULL_POINTER_EXCEPTION, names::RUNTIME_EXCEPTION),
        throwable_class(names::CLASS_CAST_EXCEPTION, names::RUNTIME_EXCEPTION),
        throwable_class(names::INDEX_OUT_OF_BOUNDS_EXCEPTION, names::RUNTIME_EXCEPTION),
        throwable_class(names::NEGATIVE_ARRAY_SIZE_EXCEPTION, names::RUNTIME_EXCEPTION),
        throwable_class(names::ERROR, names::THROWABLE),
        throwable_class(names::SUSPEND_EXECUTION, names::EXCEPTION),
        coroutine,
        string,
        thread,
    ]
}

// ===== Argument Helpers =====

fn arg(args: &[Value], index: usize) -> VmResult<&Value> {
    args.get(index).ok_or(VmError::StackUnderflow)
}

fn long_arg(args: &[Value], index: usize) -> VmResult<i64> {
    arg(args, index)?
        .as_i64()
        .ok_or_else(|| VmError::TypeError("Expected long".to_string()))
}

fn str_arg(args: &[Value], index: usize) -> VmResult<&str> {
    match arg(args, index)? {
        Value::Str(s) => Ok(&**s),
        Value::Null => Err(VmError::NullPointer),
        other => Err(VmError::TypeError(format!(
            "Expected string, found {}",
            other.type_name()
        ))),
    }
}

// ===== String =====

fn install_string_natives(vm: &Vm) {
    vm.register_native(
        names::STRING,
        "concat",
        "(Lsys/String;)Lsys/String;",
        |_, args| {
            let joined = format!("{}{}", str_arg(args, 0)?, str_arg(args, 1)?);
            Ok(Some(Value::string(&joined)))
        },
    );
    vm.register_native(names::STRING, "length", "()I", |_, args| {
        let len = str_arg(args, 0)?.chars().count();
        Ok(Some(Value::Int(len as i32)))
    });
    vm.register_native(names::STRING, "equals", "(Lsys/Object;)Z", |_, args| {
        let this = str_arg(args, 0)?;
        let equal = arg(args, 1)?.as_str() == Some(this);
        Ok(Some(Value::Int(i32::from(equal))))
    });
    for desc in ["(I)Lsys/String;", "(J)Lsys/String;", "(D)Lsys/String;", "(Lsys/Object;)Lsys/String;"] {
        vm.register_native(names::STRING, "valueOf", desc, |_, args| {
            Ok(Some(Value::string(&arg(args, 0)?.to_string())))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yield_without_instrumentation() {
        let vm = Vm::new();
        let result = vm.invoke_static(names::COROUTINE, names::YIELD_NAME, names::YIELD_DESC, vec![]);
        assert!(matches!(result, Err(VmError::NotInstrumented)));
    }

    #[test]
    fn test_string_natives() {
        let vm = Vm::new();
        let joined = vm
            .invoke_virtual(
                Value::string("ab"),
                "concat",
                "(Lsys/String;)Lsys/String;",
                vec![Value::string("cd")],
            )
            .unwrap();
        assert_eq!(joined, Some(Value::string("abcd")));

        let len = vm
            .invoke_virtual(Value::string("abc"), "length", "()I", vec![])
            .unwrap();
        assert_eq!(len, Some(Value::Int(3)));

        let text = vm
            .invoke_static(names::STRING, "valueOf", "(I)Lsys/String;", vec![Value::Int(42)])
            .unwrap();
        assert_eq!(text, Some(Value::string("42")));
    }

    #[test]
    fn test_exception_constructors() {
        let vm = Vm::new();
        let exc = vm
            .new_instance(
                names::ILLEGAL_STATE_EXCEPTION,
                "(Lsys/String;)V",
                vec![Value::string("oops")],
            )
            .unwrap();
        let message = vm
            .invoke_virtual(exc, "getMessage", "()Lsys/String;", vec![])
            .unwrap();
        assert_eq!(message, Some(Value::string("oops")));
    }

    #[test]
    fn test_sleep_rejects_negative() {
        let vm = Vm::new();
        let result = vm.invoke_static(names::THREAD, "sleep", "(J)V", vec![Value::Long(-1)]);
        assert!(matches!(result, Err(VmError::IllegalArgument(_))));
    }
}
