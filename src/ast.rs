//! A single unified syntax tree, rather than a staged CST/AST/SST pipeline
//! (see `DESIGN.md` for why). A `Var` node wraps its binding metadata in
//! `Rc<RefCell<..>>` so the optimizer's copy-propagation and IIFE-parameter
//! renaming passes can rewrite every aliased occurrence of a name in place,
//! by threading a single `Rc`-shared `VarDefine` cell through every
//! reference to a binding.

use std::cell::RefCell;
use std::rc::Rc;

/// A literal value embeddable directly in the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    Num(f64),
    Str(String),
    Bool(bool),
}

/// What kind of binding a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefKind {
    Global,
    LambdaParam,
    IifeParam,
}

/// Binding metadata the scope analyzer computes for one name in one scope.
/// Recomputed fresh by `make_scope` on every optimizer pass rather than
/// updated incrementally, so `refs`/`assigned` always reflect the tree
/// currently being examined.
#[derive(Debug)]
pub struct VarDefine {
    pub name: String,
    pub kind: DefKind,
    pub refs: Vec<Rc<VarNode>>,
    pub assigned: u32,
    pub current_value: Option<Ast>,
}

impl VarDefine {
    pub fn new(name: impl Into<String>, kind: DefKind) -> VarDefine {
        VarDefine { name: name.into(), kind, refs: Vec::new(), assigned: 0, current_value: None }
    }
}

pub type DefineHandle = crate::env::Cell<VarDefine>;

/// One occurrence of a variable name in the tree. Shared via `Rc` so that
/// renaming one occurrence (`name`) during optimization is visible from
/// every other place the same `Rc<VarNode>` is held, without re-walking the
/// tree to substitute the old name for the new one.
#[derive(Debug)]
pub struct VarNode {
    pub name: RefCell<String>,
    pub define: RefCell<Option<DefineHandle>>,
}

impl VarNode {
    pub fn new(name: impl Into<String>) -> Rc<VarNode> {
        Rc::new(VarNode { name: RefCell::new(name.into()), define: RefCell::new(None) })
    }

    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }
}

/// A parameter name bound by a `lambda` or `let`.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
}

/// A single `let` binding: `name` optionally paired with a default value
/// expression. An absent default is substituted with `Literal(false)`
/// at CPS time, not at parse time.
#[derive(Debug, Clone)]
pub struct VarDef {
    pub name: String,
    pub value: Option<Ast>,
}

/// A lambda literal. `iife_params` accumulates the names of parameters that
/// the optimizer has proven are only ever called immediately
/// (IIFE unwrapping); it starts empty and is populated in place as the
/// fixed-point rewrite discovers more IIFE call sites binding into this
/// lambda's scope. A `RefCell` rather than a plain `Vec` because the
/// optimizer needs to push onto it while its own body is still under
/// construction, before the finished `LambdaNode` is wrapped in its `Rc`.
#[derive(Debug)]
pub struct LambdaNode {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: Ast,
    pub iife_params: RefCell<Vec<String>>,
}

impl Clone for LambdaNode {
    fn clone(&self) -> LambdaNode {
        LambdaNode {
            name: self.name.clone(),
            params: self.params.clone(),
            body: self.body.clone(),
            iife_params: RefCell::new(self.iife_params.borrow().clone()),
        }
    }
}

impl LambdaNode {
    pub fn new(name: Option<String>, params: Vec<Param>, body: Ast) -> LambdaNode {
        LambdaNode { name, params, body, iife_params: RefCell::new(Vec::new()) }
    }
}

/// The unified syntax tree produced by the parser and rewritten in place by
/// the CPS transform and the optimizer.
#[derive(Debug, Clone)]
pub enum Ast {
    Lit(Lit),
    Var(Rc<VarNode>),
    Assign(Box<Ast>, Box<Ast>),
    Binary(String, Box<Ast>, Box<Ast>),
    If(Box<Ast>, Box<Ast>, Box<Ast>),
    Lambda(Rc<LambdaNode>),
    Let(Vec<VarDef>, Box<Ast>),
    Call(Box<Ast>, Vec<Ast>),
    Prog(Vec<Ast>),
    /// A verbatim `js { ... }` splice: emitted
    /// unchanged by the host-target emitter, treated as an opaque value
    /// producer by the interpreter.
    Raw(String),
}

impl Ast {
    pub fn var(name: impl Into<String>) -> Ast {
        Ast::Var(VarNode::new(name))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn var_node_rename_is_visible_through_shared_rc() {
        let node = VarNode::new("x");
        let shared = Rc::clone(&node);
        *node.name.borrow_mut() = "β_y0".to_string();
        assert_eq!(shared.name(), "β_y0");
    }
}
