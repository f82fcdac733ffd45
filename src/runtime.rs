//! Process-level runtime: the VM lock and the embedding entry points.
//!
//! The concurrency model is parallel-threads-with-single-lock: any number
//! of OS threads may hold a [`Runtime`] clone, but bytecode only runs
//! while a thread holds the lock returned by [`Runtime::lock`]. Blocking
//! host work goes through [`Runtime::unlocked`], the unlock-run-relock
//! wrapper the standard library builds its suspension points on.

use crate::ast::Program;
use crate::compiler::{compile, CompileFlags};
use crate::error::{CompileError, VmError};
use crate::interpreter::Interpreter;
use crate::script::BcScript;
use crate::value::Value;

use std::sync::{Arc, Mutex, MutexGuard};

/// A shared VM world behind the process-wide VM lock.
#[derive(Clone)]
pub struct Runtime {
    vm: Arc<Mutex<Interpreter>>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// A fresh runtime with an empty Global object.
    pub fn new() -> Self {
        Self {
            vm: Arc::new(Mutex::new(Interpreter::new())),
        }
    }

    /// Take the VM lock.
    ///
    /// Every operation that touches values, stacks or scripts runs under
    /// this guard; threads take turns at guard boundaries.
    pub fn lock(&self) -> MutexGuard<'_, Interpreter> {
        self.vm.lock().expect("VM lock poisoned")
    }

    /// The unlock-run-relock wrapper: release the VM lock around a
    /// blocking operation and reacquire it before returning.
    pub fn unlocked<R>(
        &self,
        guard: MutexGuard<'_, Interpreter>,
        f: impl FnOnce() -> R,
    ) -> (MutexGuard<'_, Interpreter>, R) {
        drop(guard);
        let r = f();
        (self.lock(), r)
    }

    /// Compile a parsed program.
    pub fn compile(
        &self,
        name: &str,
        program: &Program,
        flags: CompileFlags,
    ) -> Result<Arc<BcScript>, CompileError> {
        compile(&mut self.lock(), name, program, flags)
    }

    /// Run a compiled script's top level.
    pub fn run(&self, script: &Arc<BcScript>) -> Result<Value, VmError> {
        self.lock().run_script(script)
    }

    /// Compile-and-run in expression mode: the value of the program's
    /// last expression comes back.
    pub fn eval(&self, name: &str, program: &Program) -> Result<Value, VmError> {
        let script = self.compile(name, program, CompileFlags::EXPR)?;
        self.run(&script)
    }

    /// Call a callable value.
    pub fn call(&self, f: &Value, this: &Value, args: &[Value]) -> Result<Value, VmError> {
        let mut vm = self.lock();
        vm.call_value(f.clone(), this.clone(), args.to_vec())
            .map_err(|e| vm.uncaught(e))
    }
}
