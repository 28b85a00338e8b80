//! Lexical environment frames shared between the scope analyzer
//! (`V = VarDefine`, see `scope.rs`) and the CPS interpreter
//! (`V = Data`, see `interpreter.rs`).
//!
//! A frame is a name -> cell map plus a parent pointer, shared by parent and
//! child frames via an `Rc`'d reference with interior mutability. Cells are
//! `Rc<RefCell<V>>` so `set` can mutate a binding in place without
//! re-walking the frame chain to find it a second time.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub type Cell<V> = Rc<RefCell<V>>;
pub type EnvRef<V> = Rc<RefCell<Frame<V>>>;

#[derive(Debug)]
pub struct Frame<V> {
    parent: Option<EnvRef<V>>,
    vars: HashMap<String, Cell<V>>,
}

impl<V> Frame<V> {
    /// Creates a new root frame with no parent.
    pub fn root() -> EnvRef<V> {
        Rc::new(RefCell::new(Frame { parent: None, vars: HashMap::new() }))
    }

    /// Creates a new child frame extending `parent`.
    pub fn extend(parent: &EnvRef<V>) -> EnvRef<V> {
        Rc::new(RefCell::new(Frame {
            parent: Some(Rc::clone(parent)),
            vars: HashMap::new(),
        }))
    }

    pub fn is_root(env: &EnvRef<V>) -> bool {
        env.borrow().parent.is_none()
    }

    /// Inserts `name` into `env`'s own frame, returning the new cell.
    /// Does not check for shadowing - callers that care (the analyzer, for
    /// `IIFE_PARAM` collision detection) check `lookup` first.
    pub fn define(env: &EnvRef<V>, name: &str, value: V) -> Cell<V> {
        let cell = Rc::new(RefCell::new(value));
        env.borrow_mut().vars.insert(name.to_string(), Rc::clone(&cell));
        cell
    }

    /// Walks the frame chain outward, returning the innermost frame that
    /// declares `name`, if any.
    pub fn lookup(env: &EnvRef<V>, name: &str) -> Option<EnvRef<V>> {
        if env.borrow().vars.contains_key(name) {
            return Some(Rc::clone(env));
        }
        let parent = env.borrow().parent.clone();
        match parent {
            Some(p) => Frame::lookup(&p, name),
            None => None,
        }
    }

    /// Fetches the cell for `name`, failing if it is undefined anywhere in
    /// the chain.
    pub fn get(env: &EnvRef<V>, name: &str) -> Option<Cell<V>> {
        let frame = Frame::lookup(env, name)?;
        let cell = frame.borrow().vars.get(name).cloned();
        cell
    }

    /// Returns every `(name, cell)` pair declared directly in `env`'s own
    /// frame (not walking to the parent). Used by the emitter to enumerate
    /// global bindings.
    pub fn entries(env: &EnvRef<V>) -> Vec<(String, Cell<V>)> {
        env.borrow().vars.iter().map(|(k, v)| (k.clone(), Rc::clone(v))).collect()
    }

    /// Writes `value` into the declaring frame, defining it at the root if
    /// undefined and `env` already is the root; fails otherwise.
    pub fn set(env: &EnvRef<V>, name: &str, value: V) -> Result<(), ()> {
        match Frame::lookup(env, name) {
            Some(frame) => {
                let cell = frame.borrow().vars.get(name).cloned();
                match cell {
                    Some(cell) => {
                        *cell.borrow_mut() = value;
                        Ok(())
                    }
                    None => unreachable!("lookup found a frame without the name"),
                }
            }
            None if Frame::is_root(env) => {
                Frame::define(env, name, value);
                Ok(())
            }
            None => Err(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn define_and_get() {
        let root: EnvRef<i32> = Frame::root();
        Frame::define(&root, "x", 1);
        assert_eq!(*Frame::get(&root, "x").unwrap().borrow(), 1);
    }

    #[test]
    fn lookup_resolves_through_parent() {
        let root: EnvRef<i32> = Frame::root();
        Frame::define(&root, "x", 1);
        let child = Frame::extend(&root);
        assert!(Frame::lookup(&child, "x").is_some());
        assert!(Frame::lookup(&child, "y").is_none());
    }

    #[test]
    fn set_undefined_at_root_defines_it() {
        let root: EnvRef<i32> = Frame::root();
        assert!(Frame::set(&root, "x", 5).is_ok());
        assert_eq!(*Frame::get(&root, "x").unwrap().borrow(), 5);
    }

    #[test]
    fn set_undefined_in_child_fails() {
        let root: EnvRef<i32> = Frame::root();
        let child = Frame::extend(&root);
        assert!(Frame::set(&child, "x", 5).is_err());
    }

    #[test]
    fn set_existing_writes_through_declaring_frame() {
        let root: EnvRef<i32> = Frame::root();
        Frame::define(&root, "x", 1);
        let child = Frame::extend(&root);
        assert!(Frame::set(&child, "x", 9).is_ok());
        assert_eq!(*Frame::get(&root, "x").unwrap().borrow(), 9);
    }
}
