use serde::{Deserialize, Serialize};

/// Program representation consumed by the checking framework.
///
/// The host front end is expected to have parsed, resolved, and
/// base-type-checked the program already; this layer carries only what
/// qualifier checking needs: declared types with their explicit annotations,
/// and one control-flow graph of elementary operations per method body.

/// Everything a single `qualcheck` invocation analyzes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct ProgramBundle {
    #[serde(default)]
    pub(crate) units: Vec<CompilationUnit>,
}

/// One source file's worth of classes; the unit of analysis isolation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct CompilationUnit {
    pub(crate) path: String,
    #[serde(default)]
    pub(crate) classes: Vec<ClassDef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct ClassDef {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) super_name: Option<String>,
    #[serde(default)]
    pub(crate) interfaces: Vec<String>,
    #[serde(default)]
    pub(crate) type_params: Vec<TypeParam>,
    #[serde(default)]
    pub(crate) fields: Vec<FieldDef>,
    #[serde(default)]
    pub(crate) methods: Vec<MethodDef>,
}

/// Class-level type variable with its (possibly self-referential) bound.
/// Bounds live here rather than inline in type uses so that
/// `T extends Comparable<T>` stays a finite tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct TypeParam {
    pub(crate) name: String,
    pub(crate) bound: TypeUse,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct FieldDef {
    pub(crate) name: String,
    pub(crate) ty: TypeUse,
    #[serde(default)]
    pub(crate) is_final: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct MethodDef {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) params: Vec<VarDecl>,
    #[serde(default)]
    pub(crate) locals: Vec<VarDecl>,
    pub(crate) return_type: TypeUse,
    #[serde(default)]
    pub(crate) receiver: Option<TypeUse>,
    #[serde(default)]
    pub(crate) is_static: bool,
    #[serde(default)]
    pub(crate) body: Option<ControlFlowGraph>,
    #[serde(default)]
    pub(crate) line: Option<u32>,
}

impl MethodDef {
    pub(crate) fn declared_var(&self, name: &str) -> Option<&VarDecl> {
        self.params
            .iter()
            .chain(self.locals.iter())
            .find(|var| var.name == name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct VarDecl {
    pub(crate) name: String,
    pub(crate) ty: TypeUse,
}

/// Explicit user-written qualifier annotation attached to a type position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Annotation {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) args: Vec<String>,
}

impl Annotation {
    pub(crate) fn marker(name: &str) -> Self {
        Annotation {
            name: name.to_string(),
            args: Vec::new(),
        }
    }
}

/// A use of a plain type together with its explicit annotations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct TypeUse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) annotations: Vec<Annotation>,
    #[serde(flatten)]
    pub(crate) kind: TypeKind,
}

impl TypeUse {
    pub(crate) fn plain(kind: TypeKind) -> Self {
        TypeUse {
            annotations: Vec::new(),
            kind,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum TypeKind {
    Primitive {
        name: PrimitiveKind,
    },
    Declared {
        name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<TypeUse>,
    },
    Array {
        component: Box<TypeUse>,
    },
    TypeVar {
        name: String,
    },
    Wildcard {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bound: Option<Box<TypeUse>>,
    },
    /// Type of the `null` literal; subtype of every reference type.
    Null,
    Void,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum PrimitiveKind {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Char,
    Float,
    Double,
}

impl PrimitiveKind {
    pub(crate) fn is_numeric(self) -> bool {
        !matches!(self, PrimitiveKind::Boolean)
    }
}

impl TypeKind {
    pub(crate) fn primitive(&self) -> Option<PrimitiveKind> {
        match self {
            TypeKind::Primitive { name } => Some(*name),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct BlockId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct NodeId(pub(crate) u32);

/// Control-flow graph of one method body. Immutable after construction;
/// structural validation happens in `cfg::CfgIndex::build`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct ControlFlowGraph {
    pub(crate) blocks: Vec<BasicBlock>,
    #[serde(default)]
    pub(crate) edges: Vec<FlowEdge>,
}

/// Block `BlockId(0)` is the entry block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct BasicBlock {
    pub(crate) id: BlockId,
    #[serde(default)]
    pub(crate) nodes: Vec<Node>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum EdgeKind {
    Normal,
    TrueBranch,
    FalseBranch,
    Exception,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub(crate) struct FlowEdge {
    pub(crate) from: BlockId,
    pub(crate) to: BlockId,
    pub(crate) kind: EdgeKind,
}

/// One elementary operation. Operands reference earlier nodes by id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct Node {
    pub(crate) id: NodeId,
    #[serde(flatten)]
    pub(crate) kind: NodeKind,
    /// Host-supplied declared type, used when the type is not structurally
    /// derivable (e.g. calls into classes outside the bundle).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) ty: Option<TypeUse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) line: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum NodeKind {
    Literal {
        value: Literal,
    },
    LocalRead {
        name: String,
    },
    This,
    FieldRead {
        #[serde(default)]
        receiver: Option<NodeId>,
        field: String,
    },
    ArrayRead {
        array: NodeId,
        index: NodeId,
    },
    ArrayLength {
        array: NodeId,
    },
    Unary {
        #[serde(rename = "operator")]
        op: UnaryOp,
        operand: NodeId,
    },
    Binary {
        #[serde(rename = "operator")]
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    },
    Assign {
        target: AssignTarget,
        value: NodeId,
    },
    New {
        class: String,
    },
    Call {
        #[serde(default)]
        receiver: Option<NodeId>,
        #[serde(default)]
        class: Option<String>,
        method: String,
        #[serde(default)]
        args: Vec<NodeId>,
    },
    Return {
        #[serde(default)]
        value: Option<NodeId>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum AssignTarget {
    Local {
        local: String,
    },
    Field {
        #[serde(default)]
        receiver: Option<NodeId>,
        field: String,
    },
    Array {
        array: NodeId,
        index: NodeId,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "lit", content = "value", rename_all = "snake_case")]
pub(crate) enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinaryOp {
    pub(crate) fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    pub(crate) fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_round_trips_through_json() {
        let bundle = ProgramBundle {
            units: vec![CompilationUnit {
                path: "com/example/Sample.java".to_string(),
                classes: vec![ClassDef {
                    name: "com/example/Sample".to_string(),
                    super_name: None,
                    interfaces: Vec::new(),
                    type_params: Vec::new(),
                    fields: vec![FieldDef {
                        name: "label".to_string(),
                        ty: TypeUse {
                            annotations: vec![Annotation::marker("Nullable")],
                            kind: TypeKind::Declared {
                                name: "java/lang/String".to_string(),
                                args: Vec::new(),
                            },
                        },
                        is_final: false,
                    }],
                    methods: vec![MethodDef {
                        name: "size".to_string(),
                        params: Vec::new(),
                        locals: Vec::new(),
                        return_type: TypeUse::plain(TypeKind::Primitive {
                            name: PrimitiveKind::Int,
                        }),
                        receiver: None,
                        is_static: false,
                        body: Some(ControlFlowGraph {
                            blocks: vec![BasicBlock {
                                id: BlockId(0),
                                nodes: vec![
                                    Node {
                                        id: NodeId(0),
                                        kind: NodeKind::Literal {
                                            value: Literal::Int(0),
                                        },
                                        ty: None,
                                        line: Some(3),
                                    },
                                    Node {
                                        id: NodeId(1),
                                        kind: NodeKind::Return {
                                            value: Some(NodeId(0)),
                                        },
                                        ty: None,
                                        line: Some(3),
                                    },
                                ],
                            }],
                            edges: Vec::new(),
                        }),
                        line: Some(2),
                    }],
                }],
            }],
        };

        let json = serde_json::to_string_pretty(&bundle).expect("serialize bundle");
        let parsed: ProgramBundle = serde_json::from_str(&json).expect("parse bundle");

        assert_eq!(parsed.units.len(), 1);
        let class = &parsed.units[0].classes[0];
        assert_eq!(class.fields[0].ty.annotations[0].name, "Nullable");
        let body = class.methods[0].body.as_ref().expect("body");
        assert_eq!(body.blocks[0].nodes.len(), 2);
    }

    #[test]
    fn node_kind_uses_op_tag() {
        let json = r#"{"id": 4, "op": "local_read", "name": "x"}"#;
        let node: Node = serde_json::from_str(json).expect("parse node");
        assert!(matches!(node.kind, NodeKind::LocalRead { ref name } if name == "x"));
    }

    #[test]
    fn declared_var_finds_params_and_locals() {
        let method = MethodDef {
            name: "m".to_string(),
            params: vec![VarDecl {
                name: "p".to_string(),
                ty: TypeUse::plain(TypeKind::Primitive {
                    name: PrimitiveKind::Int,
                }),
            }],
            locals: vec![VarDecl {
                name: "v".to_string(),
                ty: TypeUse::plain(TypeKind::Primitive {
                    name: PrimitiveKind::Boolean,
                }),
            }],
            return_type: TypeUse::plain(TypeKind::Void),
            receiver: None,
            is_static: true,
            body: None,
            line: None,
        };

        assert!(method.declared_var("p").is_some());
        assert!(method.declared_var("v").is_some());
        assert!(method.declared_var("w").is_none());
    }
}
