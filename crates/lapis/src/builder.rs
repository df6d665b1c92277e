//! The builder: sole allocator of IR nodes and the home of the mutation
//! protocol.
//!
//! All types, values, expressions, blocks, block groups, and defs live in
//! pooled vectors owned by one `Builder` per package. Handles are `u32`
//! newtypes; removal unlinks nodes but never frees them, so handles stay
//! valid until the builder is dropped. Every mutation keeps both
//! directions of each edge set consistent: operand lists with value user
//! sets, terminator successors with block predecessor lists.

use std::sync::Mutex;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::block::{Block, BlockGroup, BlockGroupId, BlockGroupOwner, BlockId};
use crate::def::{CustomDef, CustomDefKind};
use crate::diag::DebugLocation;
use crate::expr::{Expr, ExprId, ExprKind, IntrinsicKind, LambdaData};
use crate::ty::{DefId, GenericParam, Type, TypeId};
use crate::value::{Attributes, FuncData, Literal, ParamOwner, Value, ValueId, ValueKind};

/// Arena and factory for a package's IR.
pub struct Builder {
    pub(crate) types: Vec<Type>,
    pub(crate) type_cache: AHashMap<Type, TypeId>,
    pub(crate) generics: Vec<GenericParam>,
    pub(crate) values: Vec<Value>,
    pub(crate) exprs: Vec<Expr>,
    pub(crate) blocks: Vec<Block>,
    pub(crate) groups: Vec<BlockGroup>,
    pub(crate) defs: Vec<CustomDef>,
    /// Extend defs, indexed for super-type queries.
    pub(crate) extend_index: Vec<DefId>,
    /// Transitive-supers cache; shared `&self` readers (the parallel
    /// checker) take the lock, writers populate it at def/type creation.
    pub(crate) supers_cache: Mutex<AHashMap<TypeId, Vec<TypeId>>>,
    next_local: u32,
    next_block: u32,
    next_group: u32,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            types: Vec::new(),
            type_cache: AHashMap::new(),
            generics: Vec::new(),
            values: Vec::new(),
            exprs: Vec::new(),
            blocks: Vec::new(),
            groups: Vec::new(),
            defs: Vec::new(),
            extend_index: Vec::new(),
            supers_cache: Mutex::new(AHashMap::new()),
            next_local: 0,
            next_block: 0,
            next_group: 0,
        }
    }

    // ===----------------------------------------------------------------===//
    // Accessors
    // ===----------------------------------------------------------------===//

    #[must_use]
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.values[id.index()]
    }

    #[must_use]
    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.index()]
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    #[must_use]
    pub fn group(&self, id: BlockGroupId) -> &BlockGroup {
        &self.groups[id.index()]
    }

    pub fn group_mut(&mut self, id: BlockGroupId) -> &mut BlockGroup {
        &mut self.groups[id.index()]
    }

    #[must_use]
    pub fn def(&self, id: DefId) -> &CustomDef {
        &self.defs[id.index()]
    }

    pub fn def_mut(&mut self, id: DefId) -> &mut CustomDef {
        &mut self.defs[id.index()]
    }

    // ===----------------------------------------------------------------===//
    // Value API
    // ===----------------------------------------------------------------===//

    fn next_local_ident(&mut self) -> String {
        let id = self.next_local;
        self.next_local += 1;
        format!("%{id}")
    }

    fn push_value(&mut self, value: Value) -> ValueId {
        let id = ValueId(u32::try_from(self.values.len()).expect("value arena exceeds u32"));
        self.values.push(value);
        id
    }

    pub fn create_literal_value(&mut self, lit: Literal, ty: TypeId) -> ValueId {
        let ident = self.next_local_ident();
        self.push_value(Value {
            ident,
            ty,
            attrs: Attributes::empty(),
            users: Vec::new(),
            loc: DebugLocation::INVALID,
            kind: ValueKind::Literal(lit),
        })
    }

    pub fn create_global_var(
        &mut self,
        name: &str,
        ty: TypeId,
        init: Option<Literal>,
        init_func: Option<ValueId>,
    ) -> ValueId {
        self.push_value(Value {
            ident: format!("@{name}"),
            ty,
            attrs: Attributes::empty(),
            users: Vec::new(),
            loc: DebugLocation::INVALID,
            kind: ValueKind::GlobalVar { init, init_func },
        })
    }

    pub fn create_imported_value(&mut self, name: &str, ty: TypeId, package: &str) -> ValueId {
        self.push_value(Value {
            ident: format!("@{name}"),
            ty,
            attrs: Attributes::IMPORTED,
            users: Vec::new(),
            loc: DebugLocation::INVALID,
            kind: ValueKind::Imported { package: package.to_string() },
        })
    }

    /// Creates a function value with an empty body group.
    pub fn create_func(
        &mut self,
        name: &str,
        ty: TypeId,
        func_kind: crate::value::FuncKind,
        package: &str,
    ) -> ValueId {
        let body = self.create_block_group(BlockGroupOwner::Detached);
        let func = self.push_value(Value {
            ident: format!("@{name}"),
            ty,
            attrs: Attributes::empty(),
            users: Vec::new(),
            loc: DebugLocation::INVALID,
            kind: ValueKind::Func(Box::new(FuncData {
                body,
                params: Vec::new(),
                ret_value: None,
                func_kind,
                parent_def: None,
                generic_params: Vec::new(),
                src_name: name.to_string(),
                package: package.to_string(),
            })),
        });
        self.group_mut(body).owner = BlockGroupOwner::Func(func);
        func
    }

    pub fn create_imported_func(
        &mut self,
        name: &str,
        ty: TypeId,
        func_kind: crate::value::FuncKind,
        package: &str,
    ) -> ValueId {
        self.push_value(Value {
            ident: format!("@{name}"),
            ty,
            attrs: Attributes::IMPORTED,
            users: Vec::new(),
            loc: DebugLocation::INVALID,
            kind: ValueKind::ImportedFunc {
                package: package.to_string(),
                func_kind,
                parent_def: None,
                src_name: name.to_string(),
            },
        })
    }

    /// Creates a parameter and registers it on its owner.
    pub fn create_parameter(&mut self, ty: TypeId, owner: ParamOwner) -> ValueId {
        let ident = self.next_local_ident();
        let param = self.push_value(Value {
            ident,
            ty,
            attrs: Attributes::READONLY,
            users: Vec::new(),
            loc: DebugLocation::INVALID,
            kind: ValueKind::Parameter { owner },
        });
        match owner {
            ParamOwner::Func(f) => {
                self.value_mut(f)
                    .func_data_mut()
                    .expect("parameter owner must be a func with body")
                    .params
                    .push(param);
            }
            ParamOwner::Lambda(e) => {
                if let ExprKind::Lambda(data) = &mut self.expr_mut(e).kind {
                    data.params.push(param);
                }
            }
        }
        param
    }

    pub fn create_def(&mut self, def: CustomDef) -> DefId {
        let id = DefId(u32::try_from(self.defs.len()).expect("def arena exceeds u32"));
        let is_extend = matches!(def.kind, CustomDefKind::Extend { .. });
        self.defs.push(def);
        if is_extend {
            self.extend_index.push(id);
            // Extensions change super sets; recorded answers are stale.
            self.supers_cache.lock().expect("supers cache poisoned").clear();
        }
        id
    }

    // ===----------------------------------------------------------------===//
    // Block and group API
    // ===----------------------------------------------------------------===//

    pub fn create_block_group(&mut self, owner: BlockGroupOwner) -> BlockGroupId {
        let id =
            BlockGroupId(u32::try_from(self.groups.len()).expect("block group arena exceeds u32"));
        let ident = format!("bg{}", self.next_group);
        self.next_group += 1;
        self.groups.push(BlockGroup { ident, blocks: Vec::new(), entry: None, owner });
        id
    }

    /// Creates a block inside `group`. The first block created becomes the
    /// entry until `set_entry_block` says otherwise.
    pub fn create_block(&mut self, group: BlockGroupId) -> BlockId {
        let id = BlockId(u32::try_from(self.blocks.len()).expect("block arena exceeds u32"));
        let ident = format!("#{}", self.next_block);
        self.next_block += 1;
        self.blocks.push(Block {
            ident,
            exprs: Vec::new(),
            preds: Vec::new(),
            parent: group,
            exception_catch_tys: Vec::new(),
        });
        let g = self.group_mut(group);
        g.blocks.push(id);
        if g.entry.is_none() {
            g.entry = Some(id);
        }
        id
    }

    pub fn set_entry_block(&mut self, group: BlockGroupId, entry: BlockId) {
        self.group_mut(group).entry = Some(entry);
    }

    /// Moves a block into another group, keeping its contents and edges.
    pub fn move_block_to_group(&mut self, block: BlockId, target: BlockGroupId) {
        let old = self.block(block).parent;
        if old == target {
            return;
        }
        self.group_mut(old).blocks.retain(|b| *b != block);
        if self.group(old).entry == Some(block) {
            self.group_mut(old).entry = None;
        }
        self.block_mut(block).parent = target;
        self.group_mut(target).blocks.push(block);
    }

    fn add_predecessor(&mut self, block: BlockId, pred: BlockId) {
        let b = self.block_mut(block);
        if !b.preds.contains(&pred) {
            b.preds.push(pred);
        }
    }

    fn remove_predecessor(&mut self, block: BlockId, pred: BlockId) {
        self.block_mut(block).preds.retain(|p| *p != pred);
    }

    /// The block's final expression, when it is a terminator.
    #[must_use]
    pub fn block_terminator(&self, block: BlockId) -> Option<ExprId> {
        let last = *self.block(block).exprs.last()?;
        self.expr(last).is_terminator().then_some(last)
    }

    /// Appends an expression, wiring predecessor edges when it terminates.
    pub fn append_expr(&mut self, block: BlockId, e: ExprId) {
        self.block_mut(block).exprs.push(e);
        self.expr_mut(e).parent = Some(block);
        if self.expr(e).is_terminator() {
            let succs: SmallVec<[BlockId; 2]> = self.expr(e).successors.clone();
            for suc in succs {
                self.add_predecessor(suc, block);
            }
        }
    }

    /// Inserts an expression at the head of the block, detaching it from
    /// its current position first.
    pub fn insert_expr_into_head(&mut self, block: BlockId, e: ExprId) {
        if let Some(parent) = self.expr(e).parent {
            self.remove_expr_only(parent, e);
        }
        self.block_mut(block).exprs.insert(0, e);
        self.expr_mut(e).parent = Some(block);
    }

    fn remove_expr_only(&mut self, block: BlockId, e: ExprId) {
        self.block_mut(block).exprs.retain(|x| *x != e);
    }

    // ===----------------------------------------------------------------===//
    // Expression API
    // ===----------------------------------------------------------------===//

    fn add_user(&mut self, value: ValueId, user: ExprId) {
        let v = self.value_mut(value);
        if !v.users.contains(&user) {
            v.users.push(user);
        }
    }

    /// Drops the user edge unless the expression still reads the value
    /// through another operand slot.
    fn remove_user_if_unused(&mut self, value: ValueId, user: ExprId) {
        if self.expr(user).operands.contains(&value) {
            return;
        }
        self.value_mut(value).users.retain(|u| *u != user);
    }

    /// Creates an expression, appends it to `parent`, and registers
    /// use-def edges. `result_ty` of `None` means no result local.
    pub fn create_expression(
        &mut self,
        kind: ExprKind,
        operands: impl Into<SmallVec<[ValueId; 4]>>,
        result_ty: Option<TypeId>,
        parent: BlockId,
        loc: DebugLocation,
    ) -> ExprId {
        let operands: SmallVec<[ValueId; 4]> = operands.into();
        let id = ExprId(u32::try_from(self.exprs.len()).expect("expr arena exceeds u32"));
        let result = result_ty.map(|ty| {
            let ident = self.next_local_ident();
            self.push_value(Value {
                ident,
                ty,
                attrs: Attributes::empty(),
                users: Vec::new(),
                loc,
                kind: ValueKind::LocalVar { def: id },
            })
        });
        self.exprs.push(Expr {
            kind,
            operands: operands.clone(),
            result,
            parent: None,
            successors: SmallVec::new(),
            groups: SmallVec::new(),
            loc,
        });
        for op in operands {
            self.add_user(op, id);
        }
        self.append_expr(parent, id);
        id
    }

    /// Creates a terminator form, appends it, and wires successor
    /// predecessor lists.
    pub fn create_terminator(
        &mut self,
        kind: ExprKind,
        operands: impl Into<SmallVec<[ValueId; 4]>>,
        successors: impl Into<SmallVec<[BlockId; 2]>>,
        result_ty: Option<TypeId>,
        parent: BlockId,
        loc: DebugLocation,
    ) -> ExprId {
        let operands: SmallVec<[ValueId; 4]> = operands.into();
        let successors: SmallVec<[BlockId; 2]> = successors.into();
        let id = ExprId(u32::try_from(self.exprs.len()).expect("expr arena exceeds u32"));
        let result = result_ty.map(|ty| {
            let ident = self.next_local_ident();
            self.push_value(Value {
                ident,
                ty,
                attrs: Attributes::empty(),
                users: Vec::new(),
                loc,
                kind: ValueKind::LocalVar { def: id },
            })
        });
        self.exprs.push(Expr {
            kind,
            operands: operands.clone(),
            result,
            parent: None,
            successors,
            groups: SmallVec::new(),
            loc,
        });
        for op in operands {
            self.add_user(op, id);
        }
        self.append_expr(parent, id);
        id
    }

    /// Allocates a local-var value whose defining expression is patched in
    /// later. Used by the block-group cloner, which must map every result
    /// before it can rebuild the expressions that use them.
    pub(crate) fn alloc_local_value(&mut self, ty: TypeId, loc: DebugLocation) -> ValueId {
        let ident = self.next_local_ident();
        self.push_value(Value {
            ident,
            ty,
            attrs: Attributes::empty(),
            users: Vec::new(),
            loc,
            kind: ValueKind::LocalVar { def: ExprId(u32::MAX) },
        })
    }

    /// Creates an expression around a pre-allocated result value, appends
    /// it, and wires use-def and predecessor edges.
    pub(crate) fn create_expr_prebuilt(
        &mut self,
        kind: ExprKind,
        operands: SmallVec<[ValueId; 4]>,
        successors: SmallVec<[BlockId; 2]>,
        result: Option<ValueId>,
        parent: BlockId,
        loc: DebugLocation,
    ) -> ExprId {
        let id = ExprId(u32::try_from(self.exprs.len()).expect("expr arena exceeds u32"));
        if let Some(res) = result {
            self.value_mut(res).kind = ValueKind::LocalVar { def: id };
        }
        self.exprs.push(Expr {
            kind,
            operands: operands.clone(),
            result,
            parent: None,
            successors,
            groups: SmallVec::new(),
            loc,
        });
        for op in operands {
            self.add_user(op, id);
        }
        self.append_expr(parent, id);
        id
    }

    /// Attaches a nested block group to a structured-control or lambda
    /// expression and records ownership.
    pub fn attach_group(&mut self, e: ExprId, group: BlockGroupId) {
        self.expr_mut(e).groups.push(group);
        self.group_mut(group).owner = BlockGroupOwner::Expr(e);
    }

    // Shorthand constructors used across the passes.

    pub fn create_constant(&mut self, lit: Literal, ty: TypeId, parent: BlockId) -> ExprId {
        self.create_expression(ExprKind::Constant(lit), SmallVec::new(), Some(ty), parent, DebugLocation::INVALID)
    }

    pub fn create_unit_literal(&mut self, parent: BlockId) -> ExprId {
        let unit = self.unit_ty();
        self.create_constant(Literal::Unit, unit, parent)
    }

    pub fn create_bool_literal(&mut self, v: bool, parent: BlockId) -> ExprId {
        let ty = self.bool_ty();
        self.create_constant(Literal::Bool(v), ty, parent)
    }

    pub fn create_allocate(&mut self, ty: TypeId, parent: BlockId) -> ExprId {
        let result_ty = self.ref_to(ty);
        self.create_expression(
            ExprKind::Allocate { ty },
            SmallVec::new(),
            Some(result_ty),
            parent,
            DebugLocation::INVALID,
        )
    }

    pub fn create_load(&mut self, location: ValueId, parent: BlockId) -> ExprId {
        let result_ty = self.strip_one_ref(self.value(location).ty);
        self.create_expression(
            ExprKind::Load,
            SmallVec::from_slice(&[location]),
            Some(result_ty),
            parent,
            DebugLocation::INVALID,
        )
    }

    pub fn create_store(&mut self, value: ValueId, location: ValueId, parent: BlockId) -> ExprId {
        let unit = self.unit_ty();
        self.create_expression(
            ExprKind::Store,
            SmallVec::from_slice(&[value, location]),
            Some(unit),
            parent,
            DebugLocation::INVALID,
        )
    }

    pub fn create_get_element_ref(
        &mut self,
        location: ValueId,
        path: &[u64],
        result_ty: TypeId,
        parent: BlockId,
    ) -> ExprId {
        self.create_expression(
            ExprKind::GetElementRef { path: SmallVec::from_slice(path) },
            SmallVec::from_slice(&[location]),
            Some(result_ty),
            parent,
            DebugLocation::INVALID,
        )
    }

    pub fn create_store_element_ref(
        &mut self,
        value: ValueId,
        location: ValueId,
        path: &[u64],
        parent: BlockId,
    ) -> ExprId {
        let unit = self.unit_ty();
        self.create_expression(
            ExprKind::StoreElementRef { path: SmallVec::from_slice(path) },
            SmallVec::from_slice(&[value, location]),
            Some(unit),
            parent,
            DebugLocation::INVALID,
        )
    }

    pub fn create_field(&mut self, base: ValueId, path: &[u64], result_ty: TypeId, parent: BlockId) -> ExprId {
        self.create_expression(
            ExprKind::Field { path: SmallVec::from_slice(path) },
            SmallVec::from_slice(&[base]),
            Some(result_ty),
            parent,
            DebugLocation::INVALID,
        )
    }

    pub fn create_tuple(&mut self, operands: &[ValueId], result_ty: TypeId, parent: BlockId) -> ExprId {
        self.create_expression(
            ExprKind::Tuple,
            SmallVec::from_slice(operands),
            Some(result_ty),
            parent,
            DebugLocation::INVALID,
        )
    }

    pub fn create_apply(
        &mut self,
        callee: ValueId,
        args: &[ValueId],
        result_ty: TypeId,
        parent: BlockId,
    ) -> ExprId {
        let mut operands = SmallVec::with_capacity(args.len() + 1);
        operands.push(callee);
        operands.extend_from_slice(args);
        self.create_expression(
            ExprKind::Apply { is_super_call: false, instantiate_args: Vec::new() },
            operands,
            Some(result_ty),
            parent,
            DebugLocation::INVALID,
        )
    }

    pub fn create_typecast(&mut self, value: ValueId, target_ty: TypeId, parent: BlockId) -> ExprId {
        self.create_expression(
            ExprKind::TypeCast,
            SmallVec::from_slice(&[value]),
            Some(target_ty),
            parent,
            DebugLocation::INVALID,
        )
    }

    pub fn create_box(&mut self, value: ValueId, box_ref_ty: TypeId, parent: BlockId) -> ExprId {
        self.create_expression(
            ExprKind::Box,
            SmallVec::from_slice(&[value]),
            Some(box_ref_ty),
            parent,
            DebugLocation::INVALID,
        )
    }

    pub fn create_unbox(&mut self, value: ValueId, target_ty: TypeId, parent: BlockId) -> ExprId {
        self.create_expression(
            ExprKind::UnBox,
            SmallVec::from_slice(&[value]),
            Some(target_ty),
            parent,
            DebugLocation::INVALID,
        )
    }

    pub fn create_intrinsic(
        &mut self,
        kind: IntrinsicKind,
        operands: &[ValueId],
        result_ty: TypeId,
        parent: BlockId,
    ) -> ExprId {
        self.create_expression(
            ExprKind::Intrinsic { kind },
            SmallVec::from_slice(operands),
            Some(result_ty),
            parent,
            DebugLocation::INVALID,
        )
    }

    pub fn create_debug(&mut self, value: ValueId, name: &str, parent: BlockId) -> ExprId {
        let unit = self.unit_ty();
        self.create_expression(
            ExprKind::Debug { name: name.to_string() },
            SmallVec::from_slice(&[value]),
            Some(unit),
            parent,
            DebugLocation::INVALID,
        )
    }

    pub fn create_spawn(&mut self, operand: ValueId, result_ty: TypeId, parent: BlockId) -> ExprId {
        self.create_expression(
            ExprKind::Spawn { execute_closure: false },
            SmallVec::from_slice(&[operand]),
            Some(result_ty),
            parent,
            DebugLocation::INVALID,
        )
    }

    /// Creates a lambda expression with an empty body group.
    pub fn create_lambda(&mut self, src_name: &str, func_ty: TypeId, parent: BlockId) -> ExprId {
        let e = self.create_expression(
            ExprKind::Lambda(Box::new(LambdaData {
                params: Vec::new(),
                ret_value: None,
                src_name: src_name.to_string(),
                is_local_func: false,
            })),
            SmallVec::new(),
            Some(func_ty),
            parent,
            DebugLocation::INVALID,
        );
        let body = self.create_block_group(BlockGroupOwner::Expr(e));
        self.expr_mut(e).groups.push(body);
        e
    }

    pub fn create_goto(&mut self, target: BlockId, parent: BlockId) -> ExprId {
        self.create_terminator(
            ExprKind::GoTo,
            SmallVec::new(),
            SmallVec::from_slice(&[target]),
            None,
            parent,
            DebugLocation::INVALID,
        )
    }

    pub fn create_branch(
        &mut self,
        cond: ValueId,
        true_block: BlockId,
        false_block: BlockId,
        parent: BlockId,
    ) -> ExprId {
        self.create_terminator(
            ExprKind::Branch,
            SmallVec::from_slice(&[cond]),
            SmallVec::from_slice(&[true_block, false_block]),
            None,
            parent,
            DebugLocation::INVALID,
        )
    }

    pub fn create_exit(&mut self, parent: BlockId) -> ExprId {
        self.create_terminator(ExprKind::Exit, SmallVec::new(), SmallVec::new(), None, parent, DebugLocation::INVALID)
    }

    pub fn create_raise(&mut self, exception: ValueId, parent: BlockId) -> ExprId {
        self.create_terminator(
            ExprKind::RaiseException,
            SmallVec::from_slice(&[exception]),
            SmallVec::new(),
            None,
            parent,
            DebugLocation::INVALID,
        )
    }

    // ===----------------------------------------------------------------===//
    // Mutation protocol
    // ===----------------------------------------------------------------===//

    /// Swaps every occurrence of `old` in the operand list for `new`,
    /// updating user sets. Idempotent when `old == new`.
    pub fn replace_operand(&mut self, e: ExprId, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        let mut changed = false;
        for slot in self.exprs[e.index()].operands.iter_mut() {
            if *slot == old {
                *slot = new;
                changed = true;
            }
        }
        if changed {
            self.add_user(new, e);
            self.remove_user_if_unused(old, e);
        }
    }

    /// Replaces the operand at `idx`, updating user sets.
    pub fn replace_operand_at(&mut self, e: ExprId, idx: usize, new: ValueId) {
        let old = self.expr(e).operands[idx];
        if old == new {
            return;
        }
        self.expr_mut(e).operands[idx] = new;
        self.add_user(new, e);
        self.remove_user_if_unused(old, e);
    }

    pub fn append_operand(&mut self, e: ExprId, op: ValueId) {
        self.expr_mut(e).operands.push(op);
        self.add_user(op, e);
    }

    /// Breaks the use-def linkage for all operands of `e`.
    fn erase_operands(&mut self, e: ExprId) {
        let operands = std::mem::take(&mut self.expr_mut(e).operands);
        for op in operands {
            self.value_mut(op).users.retain(|u| *u != e);
        }
    }

    /// Detaches the expression and erases its operand-use edges. Terminator
    /// forms also drop predecessor edges from their successors.
    pub fn remove_self_from_block(&mut self, e: ExprId) {
        if let Some(parent) = self.expr(e).parent {
            if self.expr(e).is_terminator() {
                let succs: SmallVec<[BlockId; 2]> = self.expr(e).successors.clone();
                for suc in succs {
                    self.remove_predecessor(suc, parent);
                }
            }
            self.remove_expr_only(parent, e);
            self.expr_mut(e).parent = None;
        }
        self.erase_operands(e);
    }

    /// Redirects all uses of `old`'s result to `new`'s result, unlinks
    /// `old`'s operands, and substitutes `new` in `old`'s slot in the
    /// parent block. A terminator may only be replaced by a terminator;
    /// predecessor edges of the successors are updated accordingly.
    pub fn replace_with(&mut self, old: ExprId, new: ExprId) {
        let old_is_term = self.expr(old).is_terminator();
        assert!(
            !old_is_term || self.expr(new).is_terminator(),
            "a terminator may only be replaced by another terminator"
        );
        if let (Some(old_res), Some(new_res)) = (self.expr(old).result, self.expr(new).result) {
            let users = self.value(old_res).users.clone();
            for user in users {
                self.replace_operand(user, old_res, new_res);
            }
        }
        self.erase_operands(old);

        if let Some(new_parent) = self.expr(new).parent {
            self.remove_expr_only(new_parent, new);
        }
        let parent = self.expr(old).parent.expect("cannot replace a detached expression");
        if old_is_term {
            let old_succs: SmallVec<[BlockId; 2]> = self.expr(old).successors.clone();
            for suc in old_succs {
                self.remove_predecessor(suc, parent);
            }
        }
        let exprs = &mut self.block_mut(parent).exprs;
        for slot in exprs.iter_mut() {
            if *slot == old {
                *slot = new;
            }
        }
        self.expr_mut(new).parent = Some(parent);
        self.expr_mut(old).parent = None;
        if self.expr(new).is_terminator() {
            let new_succs: SmallVec<[BlockId; 2]> = self.expr(new).successors.clone();
            for suc in new_succs {
                self.add_predecessor(suc, parent);
            }
        }
    }

    /// Detaches `e` and re-inserts it immediately before `anchor`.
    pub fn move_before(&mut self, e: ExprId, anchor: ExprId) {
        if e == anchor {
            return;
        }
        debug_assert!(!self.expr(e).is_terminator(), "terminators cannot move before another expression");
        if let Some(parent) = self.expr(e).parent {
            self.remove_expr_only(parent, e);
        }
        let target = self.expr(anchor).parent.expect("anchor must live in a block");
        let pos = self
            .block(target)
            .exprs
            .iter()
            .position(|x| *x == anchor)
            .expect("anchor not found in its parent block");
        self.block_mut(target).exprs.insert(pos, e);
        self.expr_mut(e).parent = Some(target);
    }

    /// Detaches `e` and re-inserts it immediately after `anchor`.
    pub fn move_after(&mut self, e: ExprId, anchor: ExprId) {
        debug_assert!(!self.expr(anchor).is_terminator(), "nothing may follow a terminator");
        if let Some(parent) = self.expr(e).parent {
            if self.expr(e).is_terminator() {
                let succs: SmallVec<[BlockId; 2]> = self.expr(e).successors.clone();
                for suc in succs {
                    self.remove_predecessor(suc, parent);
                }
            }
            self.remove_expr_only(parent, e);
        }
        let target = self.expr(anchor).parent.expect("anchor must live in a block");
        let pos = self
            .block(target)
            .exprs
            .iter()
            .position(|x| *x == anchor)
            .expect("anchor not found in its parent block");
        self.block_mut(target).exprs.insert(pos + 1, e);
        self.expr_mut(e).parent = Some(target);
    }

    /// Detaches `e` and appends it to `block`. Terminator edges follow the
    /// move.
    pub fn move_expr_to(&mut self, e: ExprId, block: BlockId) {
        if let Some(parent) = self.expr(e).parent {
            if self.expr(e).is_terminator() {
                let succs: SmallVec<[BlockId; 2]> = self.expr(e).successors.clone();
                for suc in succs {
                    self.remove_predecessor(suc, parent);
                }
            }
            self.remove_expr_only(parent, e);
        }
        self.append_expr(block, e);
    }

    /// Swaps one successor edge of a terminator, fixing predecessors.
    pub fn replace_successor(&mut self, term: ExprId, old: BlockId, new: BlockId) {
        let parent = self.expr(term).parent.expect("terminator must live in a block");
        let mut changed = false;
        for slot in self.exprs[term.index()].successors.iter_mut() {
            if *slot == old {
                *slot = new;
                changed = true;
            }
        }
        if changed {
            self.remove_predecessor(old, parent);
            self.add_predecessor(new, parent);
        }
    }

    /// Redirects all uses of `old` to `new`. With a scope, only users
    /// nested inside that block group are rewritten.
    pub fn replace_value_uses(&mut self, old: ValueId, new: ValueId, scope: Option<BlockGroupId>) {
        if old == new {
            return;
        }
        let users = self.value(old).users.clone();
        for user in users {
            if let Some(scope) = scope {
                if !self.expr_in_group(user, scope) {
                    continue;
                }
            }
            self.replace_operand(user, old, new);
        }
    }

    /// Whether `e` is nested (at any depth) inside `scope`.
    #[must_use]
    pub fn expr_in_group(&self, e: ExprId, scope: BlockGroupId) -> bool {
        let Some(block) = self.expr(e).parent else { return false };
        let mut group = self.block(block).parent;
        loop {
            if group == scope {
                return true;
            }
            match self.group(group).owner {
                BlockGroupOwner::Expr(owner) => match self.expr(owner).parent {
                    Some(b) => group = self.block(b).parent,
                    None => return false,
                },
                BlockGroupOwner::Func(_) | BlockGroupOwner::Detached => return false,
            }
        }
    }

    /// Moves all expressions after `separator` into a new block, terminates
    /// the first half with a `GoTo` to it, and removes the separator.
    pub fn split_block(&mut self, separator: ExprId) -> (BlockId, BlockId) {
        let block1 = self.expr(separator).parent.expect("separator must live in a block");
        let group = self.block(block1).parent;
        let block2 = self.create_block(group);
        let exprs = self.block(block1).exprs.clone();
        let pos = exprs.iter().position(|x| *x == separator).expect("separator not in its block");
        self.remove_self_from_block(separator);
        for e in &exprs[pos + 1..] {
            self.move_expr_to(*e, block2);
        }
        self.create_goto(block2, block1);
        (block1, block2)
    }

    // ===----------------------------------------------------------------===//
    // Queries
    // ===----------------------------------------------------------------===//

    /// The block group containing `e`.
    #[must_use]
    pub fn parent_group_of(&self, e: ExprId) -> Option<BlockGroupId> {
        self.expr(e).parent.map(|b| self.block(b).parent)
    }

    /// The top-level function owning a group, through any chain of
    /// structured-control and lambda expressions.
    #[must_use]
    pub fn top_level_func(&self, mut group: BlockGroupId) -> Option<ValueId> {
        loop {
            match self.group(group).owner {
                BlockGroupOwner::Func(f) => return Some(f),
                BlockGroupOwner::Expr(e) => {
                    group = self.block(self.expr(e).parent?).parent;
                }
                BlockGroupOwner::Detached => return None,
            }
        }
    }

    /// The top-level function of an expression.
    #[must_use]
    pub fn top_level_func_of_expr(&self, e: ExprId) -> Option<ValueId> {
        self.top_level_func(self.parent_group_of(e)?)
    }

    #[must_use]
    pub fn func_body(&self, func: ValueId) -> BlockGroupId {
        self.value(func).func_data().expect("not a func with body").body
    }

    #[must_use]
    pub fn func_entry_block(&self, func: ValueId) -> BlockId {
        self.group(self.func_body(func)).entry_block()
    }

    /// The `Debug` expression naming this value, if any.
    #[must_use]
    pub fn debug_expr_of(&self, value: ValueId) -> Option<ExprId> {
        self.value(value).users.iter().copied().find(|u| self.expr(*u).is_debug())
    }

    /// Renders one expression for dumps and checker output.
    #[must_use]
    pub fn expr_to_string(&self, e: ExprId) -> String {
        let expr = self.expr(e);
        let operands: Vec<&str> =
            expr.operands.iter().map(|op| self.value(*op).ident.as_str()).collect();
        let mut s = match expr.result {
            Some(res) => format!(
                "{}: {} = {}({})",
                self.value(res).ident,
                self.type_to_string(self.value(res).ty),
                expr.kind.name(),
                operands.join(", ")
            ),
            None => format!("{}({})", expr.kind.name(), operands.join(", ")),
        };
        if !expr.successors.is_empty() {
            let succs: Vec<&str> =
                expr.successors.iter().map(|b| self.block(*b).ident.as_str()).collect();
            s.push_str(&format!(" -> [{}]", succs.join(", ")));
        }
        s
    }

    /// Renders a whole function body, block by block.
    #[must_use]
    pub fn func_to_string(&self, func: ValueId) -> String {
        let mut s = format!("Func {} {{\n", self.value(func).ident);
        let body = self.func_body(func);
        for &block in &self.group(body).blocks {
            s.push_str(&format!("Block {}:\n", self.block(block).ident));
            for &e in &self.block(block).exprs {
                s.push_str("  ");
                s.push_str(&self.expr_to_string(e));
                s.push('\n');
            }
        }
        s.push('}');
        s
    }

    /// Reverse post-order over the reachable blocks of a group.
    #[must_use]
    pub fn reverse_post_order(&self, group: BlockGroupId) -> Vec<BlockId> {
        let Some(entry) = self.group(group).entry else { return Vec::new() };
        let mut post = Vec::new();
        let mut visited = ahash::AHashSet::new();
        // iterative DFS with an explicit (block, next-successor) stack
        let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
        visited.insert(entry);
        while let Some((block, child)) = stack.last_mut() {
            let succs = self
                .block_terminator(*block)
                .map(|t| self.expr(t).successors.clone())
                .unwrap_or_default();
            if *child < succs.len() {
                let next = succs[*child];
                *child += 1;
                if visited.insert(next) {
                    stack.push((next, 0));
                }
            } else {
                post.push(*block);
                stack.pop();
            }
        }
        post.reverse();
        post
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FuncKind;

    fn single_block_func(b: &mut Builder) -> (ValueId, BlockId) {
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);
        (f, entry)
    }

    #[test]
    fn test_use_def_consistency_on_create() {
        let mut b = Builder::new();
        let (_, entry) = single_block_func(&mut b);
        let i64t = b.int64_ty();
        let alloc = b.create_allocate(i64t, entry);
        let slot = b.expr(alloc).result.unwrap();
        let c = b.create_constant(Literal::Int(2), i64t, entry);
        let cv = b.expr(c).result.unwrap();
        let store = b.create_store(cv, slot, entry);
        assert!(b.value(slot).users.contains(&store));
        assert!(b.value(cv).users.contains(&store));
    }

    #[test]
    fn test_replace_operand_updates_users() {
        let mut b = Builder::new();
        let (_, entry) = single_block_func(&mut b);
        let i64t = b.int64_ty();
        let c1 = b.create_constant(Literal::Int(1), i64t, entry);
        let c2 = b.create_constant(Literal::Int(2), i64t, entry);
        let v1 = b.expr(c1).result.unwrap();
        let v2 = b.expr(c2).result.unwrap();
        let tup_ty = b.tuple_ty(vec![i64t, i64t]);
        let tup = b.create_tuple(&[v1, v1], tup_ty, entry);
        b.replace_operand(tup, v1, v2);
        assert_eq!(b.expr(tup).operands.as_slice(), &[v2, v2]);
        assert!(!b.value(v1).users.contains(&tup));
        assert!(b.value(v2).users.contains(&tup));
    }

    #[test]
    fn test_goto_wires_predecessors() {
        let mut b = Builder::new();
        let (f, entry) = single_block_func(&mut b);
        let body = b.func_body(f);
        let next = b.create_block(body);
        b.create_goto(next, entry);
        assert_eq!(b.block(next).preds, vec![entry]);
        b.create_exit(next);
        assert_eq!(b.block_terminator(entry), Some(b.block(entry).exprs[0]));
    }

    #[test]
    fn test_remove_terminator_drops_pred_edge() {
        let mut b = Builder::new();
        let (f, entry) = single_block_func(&mut b);
        let body = b.func_body(f);
        let next = b.create_block(body);
        let goto = b.create_goto(next, entry);
        b.remove_self_from_block(goto);
        assert!(b.block(next).preds.is_empty());
        assert!(b.block(entry).exprs.is_empty());
    }

    #[test]
    fn test_split_block() {
        let mut b = Builder::new();
        let (_, entry) = single_block_func(&mut b);
        let i64t = b.int64_ty();
        let before = b.create_constant(Literal::Int(1), i64t, entry);
        let sep = b.create_constant(Literal::Int(2), i64t, entry);
        let after = b.create_constant(Literal::Int(3), i64t, entry);
        b.create_exit(entry);
        let (b1, b2) = b.split_block(sep);
        assert_eq!(b1, entry);
        assert_eq!(b.block(b1).exprs[0], before);
        let term = b.block_terminator(b1).unwrap();
        assert!(matches!(b.expr(term).kind, ExprKind::GoTo));
        assert_eq!(b.expr(term).successors.as_slice(), &[b2]);
        assert_eq!(b.block(b2).exprs[0], after);
        assert!(b.block(b2).preds.contains(&b1));
        assert!(b.expr(sep).parent.is_none());
    }

    #[test]
    fn test_replace_with_redirects_users() {
        let mut b = Builder::new();
        let (_, entry) = single_block_func(&mut b);
        let i64t = b.int64_ty();
        let c1 = b.create_constant(Literal::Int(1), i64t, entry);
        let v1 = b.expr(c1).result.unwrap();
        let tup_ty = b.tuple_ty(vec![i64t]);
        let tup = b.create_tuple(&[v1], tup_ty, entry);
        let c2 = b.create_constant(Literal::Int(9), i64t, entry);
        let v2 = b.expr(c2).result.unwrap();
        b.replace_with(c1, c2);
        assert_eq!(b.expr(tup).operands.as_slice(), &[v2]);
        assert!(b.expr(c1).parent.is_none());
        // c2 moved into c1's old slot, so it appears once, first.
        assert_eq!(b.block(entry).exprs[0], c2);
        assert_eq!(b.block(entry).exprs.iter().filter(|e| **e == c2).count(), 1);
    }

    #[test]
    fn test_rpo_visits_entry_first() {
        let mut b = Builder::new();
        let (f, entry) = single_block_func(&mut b);
        let body = b.func_body(f);
        let mid = b.create_block(body);
        let end = b.create_block(body);
        b.create_goto(mid, entry);
        b.create_goto(end, mid);
        b.create_exit(end);
        let rpo = b.reverse_post_order(body);
        assert_eq!(rpo, vec![entry, mid, end]);
    }
}
