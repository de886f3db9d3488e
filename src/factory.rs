use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cfg::CfgIndex;
use crate::dataflow::analysis::{AnalysisResult, run_analysis};
use crate::dataflow::store::{Store, Value};
use crate::dataflow::transfer::TransferFunction;
use crate::defaults::DefaultingPolicy;
use crate::error::CheckError;
use crate::ir::{
    AssignTarget, ClassDef, Literal, MethodDef, Node, NodeKind, PrimitiveKind, TypeKind, TypeUse,
};
use crate::index::UnitIndex;
use crate::qualifier::{Qualifier, QualifierHierarchy, QualifierSet};
use crate::types::{AnnotatedType, TypePosition};

/// Flow-free typing: resolves a node's plain type and applies explicit
/// annotations plus the defaulting policy. Shared by the type factory and
/// the dataflow transfer functions (which must not re-enter flow analysis).
pub(crate) struct Annotator<'a, Q: Qualifier> {
    pub(crate) index: &'a UnitIndex<'a>,
    pub(crate) class: &'a ClassDef,
    pub(crate) hierarchy: &'a dyn QualifierHierarchy<Q>,
    pub(crate) defaulting: &'a dyn DefaultingPolicy<Q>,
}

impl<'a, Q: Qualifier> Annotator<'a, Q> {
    /// Annotated type for a declared type use: explicit qualifiers first,
    /// then defaults at every structural position. Idempotent.
    pub(crate) fn annotate(&self, position: TypePosition, use_: &TypeUse) -> AnnotatedType<Q> {
        let mut ty = AnnotatedType::from_use(use_, self.hierarchy);
        ty.for_each_position_mut(position, &mut |pos, node| {
            let primitive = match &node.structure {
                crate::types::TypeStructure::Primitive(kind) => Some(*kind),
                crate::types::TypeStructure::Void => return,
                _ => None,
            };
            for id in self.hierarchy.hierarchy_ids() {
                if node.qualifier(*id).is_none() {
                    node.add_qualifier(self.defaulting.for_position(
                        self.hierarchy,
                        pos,
                        primitive,
                        *id,
                    ));
                }
            }
        });
        ty
    }

    /// Primary-position value for a declared type use.
    pub(crate) fn value_from_type_use(&self, position: TypePosition, use_: &TypeUse) -> Value<Q> {
        let mut qualifiers = QualifierSet::empty();
        for annotation in &use_.annotations {
            if let Some(q) = self.hierarchy.parse_annotation(annotation) {
                qualifiers.insert(q);
            }
        }
        let primitive = use_.kind.primitive();
        for id in self.hierarchy.hierarchy_ids() {
            qualifiers.insert_missing(self.defaulting.for_position(
                self.hierarchy,
                position,
                primitive,
                *id,
            ));
        }
        Value::new(qualifiers, use_.kind.clone())
    }

    pub(crate) fn literal_value(&self, literal: &Literal) -> Value<Q> {
        let ty = match literal {
            Literal::Null => TypeKind::Null,
            Literal::Bool(_) => TypeKind::Primitive {
                name: PrimitiveKind::Boolean,
            },
            Literal::Int(_) => TypeKind::Primitive {
                name: PrimitiveKind::Int,
            },
            Literal::Str(_) => TypeKind::Declared {
                name: "java/lang/String".to_string(),
                args: Vec::new(),
            },
        };
        let mut qualifiers = QualifierSet::empty();
        for id in self.hierarchy.hierarchy_ids() {
            qualifiers.insert(self.defaulting.for_literal(self.hierarchy, literal, *id));
        }
        Value::new(qualifiers, ty)
    }

    pub(crate) fn new_value(&self, class: &str) -> Value<Q> {
        let mut qualifiers = QualifierSet::empty();
        for id in self.hierarchy.hierarchy_ids() {
            qualifiers.insert(self.defaulting.for_new(self.hierarchy, *id));
        }
        Value::new(
            qualifiers,
            TypeKind::Declared {
                name: class.to_string(),
                args: Vec::new(),
            },
        )
    }

    /// Declared (non-flow) value for any node.
    pub(crate) fn value_for_declared_node(
        &self,
        method: &MethodDef,
        cfg: &CfgIndex<'_>,
        node: &Node,
    ) -> Result<Value<Q>, CheckError> {
        match &node.kind {
            NodeKind::Literal { value } => Ok(self.literal_value(value)),
            NodeKind::New { class } => Ok(self.new_value(class)),
            _ => {
                let use_ = self.resolve_node_type(method, cfg, node)?;
                Ok(self.value_from_type_use(position_of(method, node), &use_))
            }
        }
    }

    /// Resolves the plain declared type a node produces. Failing to resolve
    /// is a distinguishable error; the framework never fabricates a type.
    pub(crate) fn resolve_node_type(
        &self,
        method: &MethodDef,
        cfg: &CfgIndex<'_>,
        node: &Node,
    ) -> Result<TypeUse, CheckError> {
        let unresolved = || CheckError::Resolution {
            node: node.id.0,
            context: format!("{}.{}", self.class.name, method.name),
        };
        let operand_type = |id| -> Result<TypeUse, CheckError> {
            let operand = cfg.node(id).ok_or_else(&unresolved)?;
            self.resolve_node_type(method, cfg, operand)
        };

        match &node.kind {
            NodeKind::Literal { value } => Ok(TypeUse::plain(match value {
                Literal::Null => TypeKind::Null,
                Literal::Bool(_) => TypeKind::Primitive {
                    name: PrimitiveKind::Boolean,
                },
                Literal::Int(_) => TypeKind::Primitive {
                    name: PrimitiveKind::Int,
                },
                Literal::Str(_) => TypeKind::Declared {
                    name: "java/lang/String".to_string(),
                    args: Vec::new(),
                },
            })),
            NodeKind::LocalRead { name } => method
                .declared_var(name)
                .map(|var| var.ty.clone())
                .or_else(|| node.ty.clone())
                .ok_or_else(&unresolved),
            NodeKind::This => Ok(method.receiver.clone().unwrap_or_else(|| {
                TypeUse::plain(TypeKind::Declared {
                    name: self.class.name.clone(),
                    args: Vec::new(),
                })
            })),
            NodeKind::FieldRead { receiver, field } => self
                .field_type(method, cfg, *receiver, field)
                .or_else(|| node.ty.clone())
                .ok_or_else(&unresolved),
            NodeKind::ArrayRead { array, .. } => {
                let array_ty = operand_type(*array)?;
                match array_ty.kind {
                    TypeKind::Array { component } => Ok(*component),
                    _ => node.ty.clone().ok_or_else(&unresolved),
                }
            }
            NodeKind::ArrayLength { .. } => Ok(TypeUse::plain(TypeKind::Primitive {
                name: PrimitiveKind::Int,
            })),
            NodeKind::Unary { op, operand } => match op {
                crate::ir::UnaryOp::Not => Ok(TypeUse::plain(TypeKind::Primitive {
                    name: PrimitiveKind::Boolean,
                })),
                crate::ir::UnaryOp::Neg => operand_type(*operand),
            },
            NodeKind::Binary { op, lhs, .. } => {
                if op.is_comparison() {
                    Ok(TypeUse::plain(TypeKind::Primitive {
                        name: PrimitiveKind::Boolean,
                    }))
                } else {
                    operand_type(*lhs)
                }
            }
            NodeKind::Assign { target, value } => match target {
                AssignTarget::Local { local } => method
                    .declared_var(local)
                    .map(|var| var.ty.clone())
                    .ok_or_else(&unresolved),
                AssignTarget::Field { receiver, field } => self
                    .field_type(method, cfg, *receiver, field)
                    .ok_or_else(&unresolved),
                AssignTarget::Array { array, .. } => {
                    let array_ty = operand_type(*array)?;
                    match array_ty.kind {
                        TypeKind::Array { component } => Ok(*component),
                        _ => operand_type(*value),
                    }
                }
            },
            NodeKind::New { class } => Ok(TypeUse::plain(TypeKind::Declared {
                name: class.clone(),
                args: Vec::new(),
            })),
            NodeKind::Call {
                receiver,
                class,
                method: callee,
                ..
            } => {
                let owner = match class {
                    Some(name) => Some(name.clone()),
                    None => receiver.and_then(|id| {
                        let ty = operand_type(id).ok()?;
                        match ty.kind {
                            TypeKind::Declared { name, .. } => Some(name),
                            _ => None,
                        }
                    }),
                };
                owner
                    .and_then(|owner| self.index.find_method(&owner, callee))
                    .map(|m| m.return_type.clone())
                    .or_else(|| node.ty.clone())
                    .ok_or_else(&unresolved)
            }
            NodeKind::Return { .. } => Ok(TypeUse::plain(TypeKind::Void)),
        }
    }

    /// Declaring method of a call node, when the owner is part of the unit.
    pub(crate) fn resolve_callee(
        &self,
        method: &MethodDef,
        cfg: &CfgIndex<'_>,
        node: &Node,
    ) -> Option<&'a MethodDef> {
        let NodeKind::Call {
            receiver,
            class,
            method: callee,
            ..
        } = &node.kind
        else {
            return None;
        };
        let owner = match class {
            Some(name) => Some(name.clone()),
            None => receiver.and_then(|id| {
                let receiver_node = cfg.node(id)?;
                let ty = self.resolve_node_type(method, cfg, receiver_node).ok()?;
                match ty.kind {
                    TypeKind::Declared { name, .. } => Some(name),
                    _ => None,
                }
            }),
        }?;
        self.index.find_method(&owner, callee)
    }

    pub(crate) fn field_type(
        &self,
        method: &MethodDef,
        cfg: &CfgIndex<'_>,
        receiver: Option<crate::ir::NodeId>,
        field: &str,
    ) -> Option<TypeUse> {
        let owner = match receiver {
            None => Some(self.class),
            Some(id) => {
                let receiver_node = cfg.node(id)?;
                if matches!(receiver_node.kind, NodeKind::This) {
                    Some(self.class)
                } else {
                    let ty = self.resolve_node_type(method, cfg, receiver_node).ok()?;
                    match ty.kind {
                        TypeKind::Declared { name, .. } => self.index.class(&name),
                        _ => None,
                    }
                }
            }
        }?;
        owner
            .fields
            .iter()
            .find(|f| f.name == field)
            .map(|f| f.ty.clone())
    }

    /// Annotated bounds of the class's type parameters, for scans that
    /// follow type-variable bounds.
    pub(crate) fn bound_table(&self) -> BTreeMap<String, AnnotatedType<Q>> {
        self.class
            .type_params
            .iter()
            .map(|param| {
                (
                    param.name.clone(),
                    self.annotate(TypePosition::Bound, &param.bound),
                )
            })
            .collect()
    }
}

/// Structural position a node's value occupies, for defaulting. Parameters
/// and locals default differently, so local reads are resolved against the
/// method's declarations.
pub(crate) fn position_of(method: &MethodDef, node: &Node) -> TypePosition {
    let local_position = |name: &str| {
        if method.params.iter().any(|param| param.name == name) {
            TypePosition::Parameter
        } else {
            TypePosition::LocalVar
        }
    };
    match &node.kind {
        NodeKind::LocalRead { name } => local_position(name),
        NodeKind::This => TypePosition::Receiver,
        NodeKind::FieldRead { .. } => TypePosition::Field,
        NodeKind::ArrayRead { .. } => TypePosition::Component,
        NodeKind::Call { .. } => TypePosition::Return,
        NodeKind::Assign { target, .. } => match target {
            AssignTarget::Local { local } => local_position(local),
            AssignTarget::Field { .. } => TypePosition::Field,
            AssignTarget::Array { .. } => TypePosition::Component,
        },
        _ => TypePosition::Expression,
    }
}

/// Produces annotated types for program nodes: explicit qualifiers, then
/// defaults, then flow refinement. Flow results are computed on first use
/// per method and memoized for the unit's checking pass.
pub(crate) struct TypeFactory<'a, Q: Qualifier> {
    annotator: Annotator<'a, Q>,
    transfer: &'a dyn TransferFunction<Q>,
    flow_enabled: bool,
    results: RefCell<BTreeMap<String, Arc<AnalysisResult<Q>>>>,
}

impl<'a, Q: Qualifier> TypeFactory<'a, Q> {
    pub(crate) fn new(
        annotator: Annotator<'a, Q>,
        transfer: &'a dyn TransferFunction<Q>,
        flow_enabled: bool,
    ) -> Self {
        TypeFactory {
            annotator,
            transfer,
            flow_enabled,
            results: RefCell::new(BTreeMap::new()),
        }
    }

    pub(crate) fn annotator(&self) -> &Annotator<'a, Q> {
        &self.annotator
    }

    /// Runs (or returns the memoized) fixed-point analysis for a method body.
    pub(crate) fn analysis(
        &self,
        method: &MethodDef,
        cfg: &CfgIndex<'_>,
    ) -> Result<Arc<AnalysisResult<Q>>, CheckError> {
        if let Some(result) = self.results.borrow().get(&method.name) {
            return Ok(Arc::clone(result));
        }
        let result = Arc::new(run_analysis(&self.annotator, self.transfer, method, cfg)?);
        self.results
            .borrow_mut()
            .insert(method.name.clone(), Arc::clone(&result));
        Ok(result)
    }

    /// The annotated type of a node: declared/defaulted, with primary
    /// qualifiers replaced by the flow-refined value when one is recorded.
    pub(crate) fn type_of_node(
        &self,
        method: &MethodDef,
        cfg: &CfgIndex<'_>,
        node: &Node,
    ) -> Result<AnnotatedType<Q>, CheckError> {
        let use_ = self.annotator.resolve_node_type(method, cfg, node)?;
        let mut ty = self.annotator.annotate(position_of(method, node), &use_);
        match &node.kind {
            NodeKind::Literal { value } => {
                for q in self.annotator.literal_value(value).qualifiers.iter() {
                    ty.replace_qualifier(q.clone());
                }
            }
            NodeKind::New { .. } => {
                for q in self
                    .annotator
                    .new_value(node_class_name(node).unwrap_or_default())
                    .qualifiers
                    .iter()
                {
                    ty.replace_qualifier(q.clone());
                }
            }
            _ => {}
        }
        if self.flow_enabled {
            let result = self.analysis(method, cfg)?;
            if let Some(value) = result.value_of(node.id) {
                for q in value.qualifiers.iter() {
                    ty.replace_qualifier(q.clone());
                }
            }
        }
        Ok(ty)
    }

    /// The store holding just before a node, when flow is enabled and the
    /// node was reached.
    pub(crate) fn store_before(
        &self,
        method: &MethodDef,
        cfg: &CfgIndex<'_>,
        node: &Node,
    ) -> Result<Option<Store<Q>>, CheckError> {
        if !self.flow_enabled {
            return Ok(None);
        }
        let result = self.analysis(method, cfg)?;
        Ok(result.store_before(node.id).cloned())
    }
}

fn node_class_name(node: &Node) -> Option<&str> {
    match &node.kind {
        NodeKind::New { class } => Some(class),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::CfgIndex;
    use crate::dataflow::transfer::DefaultTransfer;
    use crate::defaults::StandardDefaults;
    use crate::index::UnitIndex;
    use crate::ir::{TypeParam, TypeUse};
    use crate::qualifier::testing::{TOGGLE, Toggle, ToggleHierarchy};
    use crate::test_support::{
        MethodBuilder, annotated, array_ty, class_with, declared_ty, string_ty, unit_with,
    };
    use crate::types::TypeStructure;

    fn with_annotator<T>(
        unit: &crate::ir::CompilationUnit,
        run: impl FnOnce(&Annotator<'_, Toggle>) -> T,
    ) -> T {
        let index = UnitIndex::build(unit).expect("index");
        let annotator = Annotator {
            index: &index,
            class: &unit.classes[0],
            hierarchy: &ToggleHierarchy,
            defaulting: &StandardDefaults,
        };
        run(&annotator)
    }

    #[test]
    fn annotate_fills_every_position() {
        let unit = unit_with(vec![class_with("com/example/A", None, Vec::new())]);
        with_annotator(&unit, |annotator| {
            let use_ = array_ty(string_ty());
            let ty = annotator.annotate(TypePosition::Parameter, &use_);
            assert!(ty.is_fully_qualified(&[TOGGLE]));
        });
    }

    #[test]
    fn annotate_keeps_explicit_qualifiers() {
        let unit = unit_with(vec![class_with("com/example/A", None, Vec::new())]);
        with_annotator(&unit, |annotator| {
            let use_ = annotated(string_ty(), "On");
            let ty = annotator.annotate(TypePosition::Parameter, &use_);
            assert_eq!(ty.qualifier(TOGGLE), Some(&Toggle::On));
        });
    }

    #[test]
    fn defaulting_is_idempotent() {
        let unit = unit_with(vec![class_with("com/example/A", None, Vec::new())]);
        with_annotator(&unit, |annotator| {
            let use_ = array_ty(annotated(string_ty(), "On"));
            let once = annotator.annotate(TypePosition::Field, &use_);
            let mut twice = once.clone();
            twice.for_each_position_mut(TypePosition::Field, &mut |pos, node| {
                let primitive = match &node.structure {
                    TypeStructure::Primitive(kind) => Some(*kind),
                    TypeStructure::Void => return,
                    _ => None,
                };
                for id in ToggleHierarchy.hierarchy_ids() {
                    if node.qualifier(*id).is_none() {
                        node.add_qualifier(StandardDefaults.for_position(
                            &ToggleHierarchy,
                            pos,
                            primitive,
                            *id,
                        ));
                    }
                }
            });
            assert_eq!(once, twice);
        });
    }

    #[test]
    fn bound_table_annotates_recursive_bounds() {
        let mut class = class_with("com/example/Box", None, Vec::new());
        class.type_params.push(TypeParam {
            name: "T".to_string(),
            bound: TypeUse::plain(crate::ir::TypeKind::Declared {
                name: "java/lang/Comparable".to_string(),
                args: vec![TypeUse::plain(crate::ir::TypeKind::TypeVar {
                    name: "T".to_string(),
                })],
            }),
        });
        let unit = unit_with(vec![class]);
        with_annotator(&unit, |annotator| {
            let bounds = annotator.bound_table();
            let bound = bounds.get("T").expect("bound for T");
            let mut visited = 0;
            bound.scan_with_bounds(&bounds, &mut |_| visited += 1);
            assert!(visited >= 2, "bound scan must terminate and visit the bound");
        });
    }

    #[test]
    fn unresolvable_local_is_a_resolution_error() {
        let mut builder = MethodBuilder::new("broken").static_method();
        builder.block(0);
        let ghost = builder.local_read("ghost");
        builder.ret(Some(ghost));
        let unit = unit_with(vec![class_with(
            "com/example/Broken",
            None,
            vec![builder.build()],
        )]);
        with_annotator(&unit, |annotator| {
            let method = &annotator.class.methods[0];
            let cfg =
                CfgIndex::build("broken", method.body.as_ref().expect("body")).expect("cfg");
            let factory = TypeFactory::new(
                Annotator {
                    index: annotator.index,
                    class: annotator.class,
                    hierarchy: annotator.hierarchy,
                    defaulting: annotator.defaulting,
                },
                &DefaultTransfer,
                true,
            );
            let node = cfg.node(crate::ir::NodeId(0)).expect("node");
            let err = factory
                .type_of_node(method, &cfg, node)
                .expect_err("resolution failure");
            assert!(matches!(err, CheckError::Resolution { .. }));
        });
    }

    #[test]
    fn factory_memoizes_analysis_per_method() {
        let mut builder = MethodBuilder::new("steady")
            .static_method()
            .param("x", annotated(declared_ty("com/example/T"), "On"));
        builder.block(0);
        let x = builder.local_read("x");
        builder.ret(Some(x));
        let unit = unit_with(vec![class_with(
            "com/example/Steady",
            None,
            vec![builder.build()],
        )]);
        with_annotator(&unit, |annotator| {
            let method = &annotator.class.methods[0];
            let cfg =
                CfgIndex::build("steady", method.body.as_ref().expect("body")).expect("cfg");
            let factory = TypeFactory::new(
                Annotator {
                    index: annotator.index,
                    class: annotator.class,
                    hierarchy: annotator.hierarchy,
                    defaulting: annotator.defaulting,
                },
                &DefaultTransfer,
                true,
            );
            let first = factory.analysis(method, &cfg).expect("first run");
            let second = factory.analysis(method, &cfg).expect("second run");
            assert!(Arc::ptr_eq(&first, &second));

            let read = cfg.node(crate::ir::NodeId(0)).expect("read node");
            let store = factory
                .store_before(method, &cfg, read)
                .expect("store query")
                .expect("store recorded");
            assert!(
                store
                    .value_of(&crate::dataflow::store::ExpressionKey::Local("x".to_string()))
                    .is_some()
            );
        });
    }
}
