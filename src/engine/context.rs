//! Per-run context shared by traverser, resolver and engine loop

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;

use crate::cfg::{InstructionGraph, ProgramGraphs};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::memory::ChunkRegistry;
use crate::mock::{MockContext, MockPolicy};
use crate::program::{MethodId, Program, Type};
use crate::types::TypeResolver;

/// Addresses handed to static instances, counting down from here.
const STATIC_INSTANCE_BASE: i32 = -33_554_432;
/// Objects allocated while a static initializer runs, counting down.
const STATIC_ALLOCATION_BASE: i32 = -8_388_608;

/// Monotonic counters of one run. Never reused, never reset.
#[derive(Debug)]
pub struct Counters {
    next_addr: Cell<i32>,
    next_static_addr: Cell<i32>,
    next_state: Cell<u64>,
    next_name: Cell<u64>,
    next_call: Cell<u64>,
    static_instances: RefCell<HashMap<String, i32>>,
    enum_constants: RefCell<HashMap<(String, usize), i32>>,
    literals: RefCell<HashMap<String, i32>>,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            next_addr: Cell::new(1),
            next_static_addr: Cell::new(STATIC_ALLOCATION_BASE),
            next_state: Cell::new(0),
            next_name: Cell::new(0),
            next_call: Cell::new(0),
            static_instances: RefCell::new(HashMap::new()),
            enum_constants: RefCell::new(HashMap::new()),
            literals: RefCell::new(HashMap::new()),
        }
    }
}

impl Counters {
    /// Address for an object created by the method under test.
    pub fn new_addr(&self) -> i32 {
        let addr = self.next_addr.get();
        self.next_addr.set(addr + 1);
        addr
    }

    /// Address for an object created inside a static initializer.
    pub fn new_static_addr(&self) -> i32 {
        let addr = self.next_static_addr.get();
        self.next_static_addr.set(addr - 1);
        addr
    }

    pub fn state_id(&self) -> u64 {
        let id = self.next_state.get();
        self.next_state.set(id + 1);
        id
    }

    /// Identifier of one answer of a mocked method.
    pub fn call_id(&self) -> u64 {
        let id = self.next_call.get();
        self.next_call.set(id + 1);
        id
    }

    /// Fresh name for a symbolic variable, e.g. `unbounded#12`.
    pub fn fresh_name(&self, prefix: &str) -> String {
        let n = self.next_name.get();
        self.next_name.set(n + 1);
        format!("{prefix}#{n}")
    }

    pub fn static_instance_addr(&self, class: &str) -> i32 {
        let mut instances = self.static_instances.borrow_mut();
        let next = STATIC_INSTANCE_BASE - instances.len() as i32;
        *instances.entry(class.to_string()).or_insert(next)
    }

    pub fn enum_constant_addr(&self, class: &str, ordinal: usize) -> i32 {
        let key = (class.to_string(), ordinal);
        if let Some(addr) = self.enum_constants.borrow().get(&key) {
            return *addr;
        }
        let addr = self.new_static_addr();
        self.enum_constants.borrow_mut().insert(key, addr);
        addr
    }

    /// String literals are interned: one address per distinct text.
    pub fn literal_addr(&self, text: &str) -> i32 {
        if let Some(addr) = self.literals.borrow().get(text) {
            return *addr;
        }
        let addr = self.new_addr();
        self.literals.borrow_mut().insert(text.to_string(), addr);
        addr
    }
}

/// Everything a step needs besides the state itself.
pub struct EngineContext {
    pub program: Arc<Program>,
    pub graphs: ProgramGraphs,
    pub types: TypeResolver,
    pub chunks: ChunkRegistry,
    pub counters: Counters,
    pub config: EngineConfig,
    pub mock_policy: Box<dyn MockPolicy>,
}

impl EngineContext {
    pub fn new(program: Arc<Program>, config: EngineConfig) -> Self {
        let graphs = ProgramGraphs::build(&program);
        let types = TypeResolver::new(Arc::clone(&program));
        let mock_policy: Box<dyn MockPolicy> = Box::new(config.mock_strategy);
        Self {
            program,
            graphs,
            types,
            chunks: ChunkRegistry::new(),
            counters: Counters::default(),
            config,
            mock_policy,
        }
    }

    pub fn with_mock_policy(mut self, policy: Box<dyn MockPolicy>) -> Self {
        self.mock_policy = policy;
        self
    }

    pub fn graph(&self, method: MethodId) -> Result<&Arc<InstructionGraph>, EngineError> {
        self.graphs.get(method).ok_or_else(|| EngineError::Unsupported {
            location: self.program.method(method).to_string(),
            detail: "method has no body".to_string(),
        })
    }

    pub fn should_mock(&self, ty: &Type, class_under_test: &str) -> bool {
        let ctx = MockContext {
            program: &self.program,
            class_under_test,
        };
        self.mock_policy.should_mock(ty, &ctx)
    }
}
