use crate::cfg::CfgIndex;
use crate::diagnostics::{DiagnosticSink, Severity, SourceLocation};
use crate::error::CheckError;
use crate::factory::{Annotator, TypeFactory};
use crate::index::UnitIndex;
use crate::ir::{
    AssignTarget, ClassDef, CompilationUnit, MethodDef, Node, NodeKind, TypeKind,
};
use crate::qualifier::{Qualifier, QualifierHierarchy};
use crate::types::{AnnotatedType, TypePosition, is_subtype};

/// Everything a rule needs while one method body is being traversed.
pub(crate) struct CheckContext<'a, Q: Qualifier> {
    pub(crate) factory: &'a TypeFactory<'a, Q>,
    pub(crate) unit_path: &'a str,
    pub(crate) class: &'a ClassDef,
    pub(crate) method: &'a MethodDef,
    pub(crate) cfg: &'a CfgIndex<'a>,
}

impl<'a, Q: Qualifier> CheckContext<'a, Q> {
    pub(crate) fn hierarchy(&self) -> &'a dyn QualifierHierarchy<Q> {
        self.factory.annotator().hierarchy
    }

    pub(crate) fn location(&self, node: &Node) -> SourceLocation {
        SourceLocation::method(&self.class.name, &self.method.name)
            .with_unit(self.unit_path)
            .with_line(node.line.or(self.method.line))
    }
}

/// Checker-supplied use-validity rules. Defaults implement plain qualifier
/// subtyping for assignments, arguments, returns, and overrides; checkers
/// override the hooks their qualifier system needs. Rules report through the
/// sink and never abort the traversal.
pub(crate) trait RuleSet<Q: Qualifier>: Send + Sync {
    fn check_assignment(
        &self,
        ctx: &CheckContext<'_, Q>,
        node: &Node,
        target: &AnnotatedType<Q>,
        value: &AnnotatedType<Q>,
        sink: &mut DiagnosticSink,
    ) {
        if !is_subtype(ctx.hierarchy(), value, target) {
            sink.report(
                Severity::Error,
                ctx.location(node),
                "assignment.type.incompatible",
                format!(
                    "incompatible assignment: {:?} is not a subtype of {:?}",
                    value.qualifiers, target.qualifiers
                ),
            );
        }
    }

    fn check_return(
        &self,
        ctx: &CheckContext<'_, Q>,
        node: &Node,
        declared: &AnnotatedType<Q>,
        value: &AnnotatedType<Q>,
        sink: &mut DiagnosticSink,
    ) {
        if !is_subtype(ctx.hierarchy(), value, declared) {
            sink.report(
                Severity::Error,
                ctx.location(node),
                "return.type.incompatible",
                format!(
                    "incompatible return: {:?} is not a subtype of {:?}",
                    value.qualifiers, declared.qualifiers
                ),
            );
        }
    }

    fn check_argument(
        &self,
        ctx: &CheckContext<'_, Q>,
        node: &Node,
        index: usize,
        declared: &AnnotatedType<Q>,
        actual: &AnnotatedType<Q>,
        sink: &mut DiagnosticSink,
    ) {
        if !is_subtype(ctx.hierarchy(), actual, declared) {
            sink.report(
                Severity::Error,
                ctx.location(node),
                "argument.type.incompatible",
                format!(
                    "incompatible argument {index}: {:?} is not a subtype of {:?}",
                    actual.qualifiers, declared.qualifiers
                ),
            );
        }
    }

    /// Receiver of a field access, array access, or instance call.
    fn check_dereference(
        &self,
        _ctx: &CheckContext<'_, Q>,
        _node: &Node,
        _receiver: &AnnotatedType<Q>,
        _sink: &mut DiagnosticSink,
    ) {
    }

    /// Array read or write; `index_ty` is the flow-refined index type.
    fn check_array_access(
        &self,
        _ctx: &CheckContext<'_, Q>,
        _node: &Node,
        _array: &Node,
        _index_ty: &AnnotatedType<Q>,
        _sink: &mut DiagnosticSink,
    ) {
    }

    fn check_binary(
        &self,
        _ctx: &CheckContext<'_, Q>,
        _node: &Node,
        _lhs: &AnnotatedType<Q>,
        _rhs: &AnnotatedType<Q>,
        _sink: &mut DiagnosticSink,
    ) {
    }

    /// Declaration-level override compatibility: returns are covariant,
    /// parameters contravariant, in qualifier terms.
    fn check_override(
        &self,
        annotator: &Annotator<'_, Q>,
        unit_path: &str,
        class: &ClassDef,
        method: &MethodDef,
        base_class: &ClassDef,
        base_method: &MethodDef,
        sink: &mut DiagnosticSink,
    ) {
        let location = SourceLocation::method(&class.name, &method.name)
            .with_unit(unit_path)
            .with_line(method.line);
        let return_ty = annotator.annotate(TypePosition::Return, &method.return_type);
        let base_return = annotator.annotate(TypePosition::Return, &base_method.return_type);
        if !is_subtype(annotator.hierarchy, &return_ty, &base_return) {
            sink.report(
                Severity::Error,
                location.clone(),
                "override.return.invalid",
                format!(
                    "{}.{} overrides {}.{} with an incompatible return qualifier",
                    class.name, method.name, base_class.name, base_method.name
                ),
            );
        }
        for (index, (param, base_param)) in method
            .params
            .iter()
            .zip(base_method.params.iter())
            .enumerate()
        {
            let param_ty = annotator.annotate(TypePosition::Parameter, &param.ty);
            let base_ty = annotator.annotate(TypePosition::Parameter, &base_param.ty);
            if !is_subtype(annotator.hierarchy, &base_ty, &param_ty) {
                sink.report(
                    Severity::Error,
                    location.clone(),
                    "override.param.invalid",
                    format!(
                        "{}.{} parameter {} weakens the qualifier inherited from {}.{}",
                        class.name, method.name, index, base_class.name, base_method.name
                    ),
                );
            }
        }
    }
}

/// Rule set with no checker-specific behavior.
pub(crate) struct DefaultRules;

impl<Q: Qualifier> RuleSet<Q> for DefaultRules {}

/// Depth-first traversal of one compilation unit for one checker
/// configuration. Queries the type factory per node and dispatches to the
/// rule set; collects rule violations, aborts only on engine-internal
/// failures.
pub(crate) struct Visitor<'a, Q: Qualifier> {
    pub(crate) hierarchy: &'a dyn QualifierHierarchy<Q>,
    pub(crate) defaulting: &'a dyn crate::defaults::DefaultingPolicy<Q>,
    pub(crate) transfer: &'a dyn crate::dataflow::transfer::TransferFunction<Q>,
    pub(crate) rules: &'a dyn RuleSet<Q>,
    pub(crate) flow_enabled: bool,
}

impl<'a, Q: Qualifier> Visitor<'a, Q> {
    pub(crate) fn check_unit(
        &self,
        unit: &CompilationUnit,
        index: &UnitIndex<'_>,
        sink: &mut DiagnosticSink,
    ) -> Result<(), CheckError> {
        for class in &unit.classes {
            let annotator = Annotator {
                index,
                class,
                hierarchy: self.hierarchy,
                defaulting: self.defaulting,
            };
            self.check_overrides(&annotator, unit, index, class, sink);

            let factory = TypeFactory::new(
                Annotator {
                    index,
                    class,
                    hierarchy: self.hierarchy,
                    defaulting: self.defaulting,
                },
                self.transfer,
                self.flow_enabled,
            );
            for method in &class.methods {
                let Some(body) = &method.body else {
                    continue;
                };
                let cfg = CfgIndex::build(&format!("{}.{}", class.name, method.name), body)?;
                let ctx = CheckContext {
                    factory: &factory,
                    unit_path: &unit.path,
                    class,
                    method,
                    cfg: &cfg,
                };
                for block in &body.blocks {
                    for node in &block.nodes {
                        self.check_node(&ctx, node, sink)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn check_overrides(
        &self,
        annotator: &Annotator<'_, Q>,
        unit: &CompilationUnit,
        index: &UnitIndex<'_>,
        class: &ClassDef,
        sink: &mut DiagnosticSink,
    ) {
        for method in &class.methods {
            for base_class in index.supertypes(class) {
                let Some(base_method) = base_class.methods.iter().find(|m| m.name == method.name)
                else {
                    continue;
                };
                self.rules.check_override(
                    annotator,
                    &unit.path,
                    class,
                    method,
                    base_class,
                    base_method,
                    sink,
                );
            }
        }
    }

    fn check_node(
        &self,
        ctx: &CheckContext<'_, Q>,
        node: &Node,
        sink: &mut DiagnosticSink,
    ) -> Result<(), CheckError> {
        match &node.kind {
            NodeKind::Assign { target, value } => {
                let Some(value_ty) = self.node_type(ctx, *value, sink)? else {
                    return Ok(());
                };
                if let Some(target_ty) = self.target_type(ctx, node, target, sink)? {
                    self.rules
                        .check_assignment(ctx, node, &target_ty, &value_ty, sink);
                }
                if let AssignTarget::Array { array, index } = target {
                    self.array_access(ctx, node, *array, *index, sink)?;
                }
                Ok(())
            }
            NodeKind::FieldRead {
                receiver: Some(receiver),
                ..
            } => self.dereference(ctx, node, *receiver, sink),
            NodeKind::ArrayLength { array } => self.dereference(ctx, node, *array, sink),
            NodeKind::ArrayRead { array, index } => {
                self.array_access(ctx, node, *array, *index, sink)
            }
            NodeKind::Call { receiver, args, .. } => {
                if let Some(receiver) = receiver {
                    self.dereference(ctx, node, *receiver, sink)?;
                }
                let annotator = ctx.factory.annotator();
                if let Some(callee) = annotator.resolve_callee(ctx.method, ctx.cfg, node) {
                    for (index, (param, arg)) in callee.params.iter().zip(args.iter()).enumerate()
                    {
                        let declared = annotator.annotate(TypePosition::Parameter, &param.ty);
                        let Some(actual) = self.node_type(ctx, *arg, sink)? else {
                            continue;
                        };
                        self.rules
                            .check_argument(ctx, node, index, &declared, &actual, sink);
                    }
                }
                Ok(())
            }
            NodeKind::Return { value: Some(value) } => {
                if matches!(ctx.method.return_type.kind, TypeKind::Void) {
                    return Ok(());
                }
                let declared = ctx
                    .factory
                    .annotator()
                    .annotate(TypePosition::Return, &ctx.method.return_type);
                if let Some(actual) = self.node_type(ctx, *value, sink)? {
                    self.rules.check_return(ctx, node, &declared, &actual, sink);
                }
                Ok(())
            }
            NodeKind::Binary { lhs, rhs, .. } => {
                let Some(lhs_ty) = self.node_type(ctx, *lhs, sink)? else {
                    return Ok(());
                };
                let Some(rhs_ty) = self.node_type(ctx, *rhs, sink)? else {
                    return Ok(());
                };
                self.rules.check_binary(ctx, node, &lhs_ty, &rhs_ty, sink);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn dereference(
        &self,
        ctx: &CheckContext<'_, Q>,
        node: &Node,
        receiver: crate::ir::NodeId,
        sink: &mut DiagnosticSink,
    ) -> Result<(), CheckError> {
        if let Some(receiver_ty) = self.node_type(ctx, receiver, sink)? {
            self.rules.check_dereference(ctx, node, &receiver_ty, sink);
        }
        Ok(())
    }

    fn array_access(
        &self,
        ctx: &CheckContext<'_, Q>,
        node: &Node,
        array: crate::ir::NodeId,
        index: crate::ir::NodeId,
        sink: &mut DiagnosticSink,
    ) -> Result<(), CheckError> {
        self.dereference(ctx, node, array, sink)?;
        let Some(array_node) = ctx.cfg.node(array) else {
            return Err(CheckError::internal(
                "visitor",
                format!("array operand {array:?} has no node"),
            ));
        };
        if let Some(index_ty) = self.node_type(ctx, index, sink)? {
            self.rules
                .check_array_access(ctx, node, array_node, &index_ty, sink);
        }
        Ok(())
    }

    fn target_type(
        &self,
        ctx: &CheckContext<'_, Q>,
        node: &Node,
        target: &AssignTarget,
        sink: &mut DiagnosticSink,
    ) -> Result<Option<AnnotatedType<Q>>, CheckError> {
        let annotator = ctx.factory.annotator();
        let (position, use_) = match target {
            AssignTarget::Local { local } => match ctx.method.declared_var(local) {
                Some(var) => {
                    let position = if ctx.method.params.iter().any(|p| &p.name == local) {
                        TypePosition::Parameter
                    } else {
                        TypePosition::LocalVar
                    };
                    (position, var.ty.clone())
                }
                None => {
                    self.report_resolution(ctx, node, sink);
                    return Ok(None);
                }
            },
            AssignTarget::Field { receiver, field } => {
                match annotator.field_type(ctx.method, ctx.cfg, *receiver, field) {
                    Some(ty) => (TypePosition::Field, ty),
                    None => {
                        self.report_resolution(ctx, node, sink);
                        return Ok(None);
                    }
                }
            }
            AssignTarget::Array { array, .. } => {
                let Some(array_node) = ctx.cfg.node(*array) else {
                    return Ok(None);
                };
                let array_ty = annotator.resolve_node_type(ctx.method, ctx.cfg, array_node)?;
                match array_ty.kind {
                    TypeKind::Array { component } => (TypePosition::Component, *component),
                    _ => {
                        self.report_resolution(ctx, node, sink);
                        return Ok(None);
                    }
                }
            }
        };
        Ok(Some(annotator.annotate(position, &use_)))
    }

    /// Queries the factory for a node's type; resolution failures surface as
    /// a diagnostic and skip the node rather than aborting the unit.
    fn node_type(
        &self,
        ctx: &CheckContext<'_, Q>,
        id: crate::ir::NodeId,
        sink: &mut DiagnosticSink,
    ) -> Result<Option<AnnotatedType<Q>>, CheckError> {
        let Some(node) = ctx.cfg.node(id) else {
            return Err(CheckError::internal(
                "visitor",
                format!("operand {id:?} has no node"),
            ));
        };
        match ctx.factory.type_of_node(ctx.method, ctx.cfg, node) {
            Ok(ty) => Ok(Some(ty)),
            Err(CheckError::Resolution { .. }) => {
                self.report_resolution(ctx, node, sink);
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    fn report_resolution(
        &self,
        ctx: &CheckContext<'_, Q>,
        node: &Node,
        sink: &mut DiagnosticSink,
    ) {
        sink.report(
            Severity::Error,
            ctx.location(node),
            "type.resolution.error",
            format!(
                "cannot resolve a type for node {} in {}.{}",
                node.id.0, ctx.class.name, ctx.method.name
            ),
        );
    }
}
