//! A sequence of instructions threaded through the arena (§3.2).
//!
//! `Block` is a thin, `Copy` view — just the first and last handle of a
//! singly-owned run of instructions linked via `Instruction::next`/`prev`
//! inside the arena. Building a program is a sequence of `Block::concat`
//! calls, the same way the `gen_*` grammar actions splice `block`
//! values together; nothing here ever copies instruction payloads.

use crate::bytecode::Opcode;
use crate::ir::arena::{Arena, InstHandle};
use crate::value::{Value, ValueKind};

/// A (possibly empty) run of instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    first: Option<InstHandle>,
    last: Option<InstHandle>,
}

impl Block {
    #[must_use]
    pub const fn empty() -> Self {
        Self { first: None, last: None }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    #[must_use]
    pub fn first(&self) -> Option<InstHandle> {
        self.first
    }

    #[must_use]
    pub fn last(&self) -> Option<InstHandle> {
        self.last
    }

    /// Wraps a single freshly allocated instruction in a one-node block.
    #[must_use]
    pub fn single(handle: InstHandle) -> Self {
        Self { first: Some(handle), last: Some(handle) }
    }

    /// Splices `self` followed by `other` into one block (`gen_both`'s
    /// underlying primitive, and the spine of every `gen_*` combinator).
    ///
    /// An empty operand is simply skipped: concatenating with an empty
    /// block returns the other operand unchanged (the `if (!b1.first)
    /// return b2;` shortcut a linked-list splice needs).
    #[must_use]
    pub fn concat(self, arena: &mut Arena, other: Self) -> Self {
        let Some(self_last) = self.last else {
            return other;
        };
        let Some(other_first) = other.first else {
            return self;
        };
        arena.get_mut(self_last).next = Some(other_first);
        arena.get_mut(other_first).prev = Some(self_last);
        Self { first: self.first, last: other.last }
    }

    /// Folds a sequence of blocks left to right with [`concat`](Self::concat).
    #[must_use]
    pub fn concat_all(arena: &mut Arena, blocks: impl IntoIterator<Item = Self>) -> Self {
        blocks.into_iter().fold(Self::empty(), |acc, b| acc.concat(arena, b))
    }

    #[must_use]
    pub fn len(&self, arena: &Arena) -> usize {
        self.iter(arena).count()
    }

    #[must_use]
    pub fn last_opcode(&self, arena: &Arena) -> Option<Opcode> {
        self.last.map(|h| arena.get(h).opcode)
    }

    /// `block_is_single`: true for a one-instruction block.
    #[must_use]
    pub fn is_single(&self) -> bool {
        self.first.is_some() && self.first == self.last
    }

    /// `block_is_noop`: an empty block carries neither bytecode nor
    /// bindings. Same condition as [`is_empty`](Self::is_empty); kept
    /// under its own name since callers reach for whichever reads better
    /// at the call site (emptiness vs. "this is jq's `.` identity").
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.is_empty()
    }

    /// `block_is_const`: a single `LOADK` instruction.
    #[must_use]
    pub fn is_const(&self, arena: &Arena) -> bool {
        self.is_single() && self.last_opcode(arena) == Some(Opcode::LoadK)
    }

    /// `block_const_kind`. Panics if `self` is not [`is_const`](Self::is_const).
    #[must_use]
    pub fn const_kind(&self, arena: &Arena) -> ValueKind {
        self.const_value(arena).kind()
    }

    /// `block_const`: a fresh clone of the constant (cheap — `Value` is
    /// refcounted). Panics if `self` is not [`is_const`](Self::is_const).
    #[must_use]
    pub fn const_value(&self, arena: &Arena) -> Value {
        assert!(self.is_const(arena), "const_value called on a non-constant block");
        let handle = self.first.expect("is_const implies a first instruction");
        arena.get(handle).imm.as_const().expect("LOADK always carries a constant").clone()
    }

    /// `block_has_main`: true if this block opens with the `TOP` marker.
    #[must_use]
    pub fn has_main(&self, arena: &Arena) -> bool {
        self.first_opcode(arena) == Some(Opcode::Top)
    }

    /// `block_is_funcdef`: true if this block opens with a user function
    /// definition (as opposed to e.g. a bare expression or `$var` binder).
    #[must_use]
    pub fn is_funcdef(&self, arena: &Arena) -> bool {
        self.first_opcode(arena) == Some(Opcode::ClosureCreate)
    }

    #[must_use]
    fn first_opcode(&self, arena: &Arena) -> Option<Opcode> {
        self.first.map(|h| arena.get(h).opcode)
    }

    /// `block_take`: detaches the head instruction from `self` (mutating
    /// it in place to hold the remainder) and returns the detached handle.
    /// `None` if `self` was already empty.
    pub fn take(&mut self, arena: &mut Arena) -> Option<InstHandle> {
        let head = self.first?;
        let next = arena.get(head).next;
        if let Some(next_handle) = next {
            arena.get_mut(next_handle).prev = None;
            arena.get_mut(head).next = None;
            self.first = Some(next_handle);
        } else {
            self.first = None;
            self.last = None;
        }
        Some(head)
    }

    /// Snapshots this block's top-level handles into a `Vec`, in order.
    ///
    /// Binder and lowering passes need to mutate the arena (rewrite
    /// `bound_by`, rewrite `imm`) while walking a block's instructions;
    /// doing that through a live iterator borrowing the arena would fight
    /// the borrow checker for no benefit, since blocks are never mutated
    /// structurally mid-walk. Snapshotting handles first and then
    /// iterating the `Vec` while passing `&mut Arena` by handle is the
    /// idiomatic way around that.
    #[must_use]
    pub fn handles(&self, arena: &Arena) -> Vec<InstHandle> {
        self.iter(arena).collect()
    }

    #[must_use]
    pub fn iter<'a>(&self, arena: &'a Arena) -> BlockIter<'a> {
        BlockIter { arena, next: self.first }
    }
}

pub struct BlockIter<'a> {
    arena: &'a Arena,
    next: Option<InstHandle>,
}

impl Iterator for BlockIter<'_> {
    type Item = InstHandle;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.arena.get(current).next;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::Instruction;

    #[test]
    fn concat_with_empty_is_identity() {
        let mut arena = Arena::new();
        let h = arena.alloc(Instruction::simple(Opcode::Dup));
        let b = Block::single(h);
        assert_eq!(b.concat(&mut arena, Block::empty()), b);
        assert_eq!(Block::empty().concat(&mut arena, b), b);
    }

    #[test]
    fn concat_links_in_order() {
        let mut arena = Arena::new();
        let a = Block::single(arena.alloc(Instruction::simple(Opcode::Dup)));
        let b = Block::single(arena.alloc(Instruction::simple(Opcode::Pop)));
        let joined = a.concat(&mut arena, b);
        let ops: Vec<_> = joined.iter(&arena).map(|h| arena.get(h).opcode).collect();
        assert_eq!(ops, vec![Opcode::Dup, Opcode::Pop]);
        assert_eq!(joined.len(&arena), 2);
    }

    #[test]
    fn is_single_and_is_noop_are_disjoint() {
        let mut arena = Arena::new();
        let one = Block::single(arena.alloc(Instruction::simple(Opcode::Dup)));
        assert!(one.is_single());
        assert!(!one.is_noop());
        assert!(Block::empty().is_noop());
        assert!(!Block::empty().is_single());
    }

    #[test]
    fn take_detaches_the_head_instruction() {
        let mut arena = Arena::new();
        let a = arena.alloc(Instruction::simple(Opcode::Dup));
        let b = arena.alloc(Instruction::simple(Opcode::Pop));
        let mut block = Block::single(a).concat(&mut arena, Block::single(b));
        let head = block.take(&mut arena).unwrap();
        assert_eq!(head, a);
        assert_eq!(block.handles(&arena), vec![b]);
        let tail = block.take(&mut arena).unwrap();
        assert_eq!(tail, b);
        assert!(block.take(&mut arena).is_none());
    }
}
