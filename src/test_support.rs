//! Builders for constructing program representations in tests without
//! hand-writing JSON.

use crate::ir::{
    Annotation, AssignTarget, BasicBlock, BinaryOp, BlockId, ClassDef, CompilationUnit,
    ControlFlowGraph, EdgeKind, FieldDef, FlowEdge, Literal, MethodDef, Node, NodeId, NodeKind,
    PrimitiveKind, TypeKind, TypeUse, VarDecl,
};

pub(crate) fn int_ty() -> TypeUse {
    TypeUse::plain(TypeKind::Primitive {
        name: PrimitiveKind::Int,
    })
}

pub(crate) fn boolean_ty() -> TypeUse {
    TypeUse::plain(TypeKind::Primitive {
        name: PrimitiveKind::Boolean,
    })
}

pub(crate) fn string_ty() -> TypeUse {
    declared_ty("java/lang/String")
}

pub(crate) fn declared_ty(name: &str) -> TypeUse {
    TypeUse::plain(TypeKind::Declared {
        name: name.to_string(),
        args: Vec::new(),
    })
}

pub(crate) fn array_ty(component: TypeUse) -> TypeUse {
    TypeUse::plain(TypeKind::Array {
        component: Box::new(component),
    })
}

pub(crate) fn annotated(mut ty: TypeUse, annotation: &str) -> TypeUse {
    ty.annotations.push(Annotation::marker(annotation));
    ty
}

pub(crate) fn var(name: &str, ty: TypeUse) -> VarDecl {
    VarDecl {
        name: name.to_string(),
        ty,
    }
}

pub(crate) fn field(name: &str, ty: TypeUse) -> FieldDef {
    FieldDef {
        name: name.to_string(),
        ty,
        is_final: false,
    }
}

pub(crate) fn class_with(name: &str, super_name: Option<&str>, methods: Vec<MethodDef>) -> ClassDef {
    ClassDef {
        name: name.to_string(),
        super_name: super_name.map(str::to_string),
        interfaces: Vec::new(),
        type_params: Vec::new(),
        fields: Vec::new(),
        methods,
    }
}

pub(crate) fn unit_with(classes: Vec<ClassDef>) -> CompilationUnit {
    CompilationUnit {
        path: "com/example/Test.java".to_string(),
        classes,
    }
}

/// Builds one method body block by block; node ids are assigned
/// sequentially.
pub(crate) struct MethodBuilder {
    name: String,
    params: Vec<VarDecl>,
    locals: Vec<VarDecl>,
    return_type: TypeUse,
    is_static: bool,
    blocks: Vec<BasicBlock>,
    edges: Vec<FlowEdge>,
    current: Option<(BlockId, Vec<Node>)>,
    next_node: u32,
}

impl MethodBuilder {
    pub(crate) fn new(name: &str) -> Self {
        MethodBuilder {
            name: name.to_string(),
            params: Vec::new(),
            locals: Vec::new(),
            return_type: TypeUse::plain(TypeKind::Void),
            is_static: false,
            blocks: Vec::new(),
            edges: Vec::new(),
            current: None,
            next_node: 0,
        }
    }

    pub(crate) fn static_method(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub(crate) fn param(mut self, name: &str, ty: TypeUse) -> Self {
        self.params.push(var(name, ty));
        self
    }

    pub(crate) fn local(mut self, name: &str, ty: TypeUse) -> Self {
        self.locals.push(var(name, ty));
        self
    }

    pub(crate) fn returns(mut self, ty: TypeUse) -> Self {
        self.return_type = ty;
        self
    }

    pub(crate) fn block(&mut self, id: u32) {
        self.finish_block();
        self.current = Some((BlockId(id), Vec::new()));
    }

    fn finish_block(&mut self) {
        if let Some((id, nodes)) = self.current.take() {
            self.blocks.push(BasicBlock { id, nodes });
        }
    }

    pub(crate) fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        let (_, nodes) = self
            .current
            .as_mut()
            .expect("begin a block before pushing nodes");
        nodes.push(Node {
            id,
            kind,
            ty: None,
            line: None,
        });
        id
    }

    pub(crate) fn lit_int(&mut self, value: i64) -> NodeId {
        self.push(NodeKind::Literal {
            value: Literal::Int(value),
        })
    }

    pub(crate) fn lit_null(&mut self) -> NodeId {
        self.push(NodeKind::Literal {
            value: Literal::Null,
        })
    }

    pub(crate) fn local_read(&mut self, name: &str) -> NodeId {
        self.push(NodeKind::LocalRead {
            name: name.to_string(),
        })
    }

    pub(crate) fn this(&mut self) -> NodeId {
        self.push(NodeKind::This)
    }

    pub(crate) fn field_read(&mut self, receiver: Option<NodeId>, name: &str) -> NodeId {
        self.push(NodeKind::FieldRead {
            receiver,
            field: name.to_string(),
        })
    }

    pub(crate) fn array_length(&mut self, array: NodeId) -> NodeId {
        self.push(NodeKind::ArrayLength { array })
    }

    pub(crate) fn array_read(&mut self, array: NodeId, index: NodeId) -> NodeId {
        self.push(NodeKind::ArrayRead { array, index })
    }

    pub(crate) fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.push(NodeKind::Binary { op, lhs, rhs })
    }

    pub(crate) fn assign_local(&mut self, local: &str, value: NodeId) -> NodeId {
        self.push(NodeKind::Assign {
            target: AssignTarget::Local {
                local: local.to_string(),
            },
            value,
        })
    }

    pub(crate) fn assign_array(&mut self, array: NodeId, index: NodeId, value: NodeId) -> NodeId {
        self.push(NodeKind::Assign {
            target: AssignTarget::Array { array, index },
            value,
        })
    }

    pub(crate) fn call(
        &mut self,
        receiver: Option<NodeId>,
        class: Option<&str>,
        method: &str,
        args: Vec<NodeId>,
    ) -> NodeId {
        self.push(NodeKind::Call {
            receiver,
            class: class.map(str::to_string),
            method: method.to_string(),
            args,
        })
    }

    pub(crate) fn ret(&mut self, value: Option<NodeId>) -> NodeId {
        self.push(NodeKind::Return { value })
    }

    pub(crate) fn edge(&mut self, from: u32, to: u32, kind: EdgeKind) {
        self.edges.push(FlowEdge {
            from: BlockId(from),
            to: BlockId(to),
            kind,
        });
    }

    pub(crate) fn build(mut self) -> MethodDef {
        self.finish_block();
        MethodDef {
            name: self.name,
            params: self.params,
            locals: self.locals,
            return_type: self.return_type,
            receiver: None,
            is_static: self.is_static,
            body: Some(ControlFlowGraph {
                blocks: self.blocks,
                edges: self.edges,
            }),
            line: None,
        }
    }
}
