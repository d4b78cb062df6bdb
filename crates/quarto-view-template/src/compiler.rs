/*
 * compiler.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compile pipeline.
//!
//! ```text
//! source -> parse -> expand includes (recursive)
//!        -> [extends? collect blocks, load parent, expand its includes, repeat]
//!        -> apply blocks -> lower -> check names
//! ```
//!
//! The result is a [`CompiledTemplate`] with no `extends`, `block`, or
//! `include` left in it. Every file read along the way is recorded as a
//! dependency so the cache can invalidate the template when any of them
//! changes.

use crate::ast::{
    Block, Conditional, Extends, ForLoop, Include, SourceLocation, TemplateNode, WhileLoop,
};
use crate::compiled::{CompiledTemplate, Node, lower, visit_exprs};
use crate::controlflow::parse_template;
use crate::error::{TemplateError, TemplateResult};
use crate::inheritance::{BlockMap, Precedence, apply_blocks, collect_blocks};
use crate::loader::TemplateLoader;
use crate::registry::Registry;
use indexmap::IndexSet;
use std::path::{Path, PathBuf};

/// Label used in locations for templates compiled from a string.
const INLINE_LABEL: &str = "<string>";

/// Turns template sources into [`CompiledTemplate`]s.
pub struct Compiler<'a> {
    loader: &'a dyn TemplateLoader,
    registry: &'a Registry,
    max_depth: usize,
}

/// Scratch state for one compile call.
#[derive(Debug, Default)]
struct CompileState {
    /// Templates being expanded, outermost first.
    stack: Vec<PathBuf>,
    /// Every file read, in first-read order.
    dependencies: IndexSet<PathBuf>,
    /// Where missing includes would have been read from.
    missing_includes: IndexSet<PathBuf>,
}

impl<'a> Compiler<'a> {
    pub fn new(loader: &'a dyn TemplateLoader, registry: &'a Registry, max_depth: usize) -> Self {
        Self {
            loader,
            registry,
            max_depth,
        }
    }

    /// Resolve a top-level template name.
    pub fn resolve(&self, name: &str) -> TemplateResult<PathBuf> {
        self.loader
            .resolve(name, None)
            .ok_or_else(|| TemplateError::TemplateNotFound {
                name: name.to_string(),
            })
    }

    /// Resolve and compile the template called `name`.
    pub fn compile(&self, name: &str) -> TemplateResult<CompiledTemplate> {
        let path = self.resolve(name)?;
        self.compile_path(name, &path)
    }

    /// Compile an already resolved template.
    pub fn compile_path(&self, name: &str, path: &Path) -> TemplateResult<CompiledTemplate> {
        let mut state = CompileState::default();
        self.enter(path, &mut state)?;
        let source = self.read(path, &mut state)?;
        let nodes = self.flatten(&source, &path.display().to_string(), Some(path), &mut state)?;
        self.finish(name, path.to_path_buf(), nodes, state)
    }

    /// Compile template text that has no file of its own.
    ///
    /// `extends` and `include` names inside it resolve against the template root.
    pub fn compile_source(&self, name: &str, source: &str) -> TemplateResult<CompiledTemplate> {
        let mut state = CompileState::default();
        let nodes = self.flatten(source, INLINE_LABEL, None, &mut state)?;
        self.finish(name, PathBuf::from(INLINE_LABEL), nodes, state)
    }

    fn finish(
        &self,
        name: &str,
        path: PathBuf,
        nodes: Vec<TemplateNode>,
        state: CompileState,
    ) -> TemplateResult<CompiledTemplate> {
        let nodes = lower(nodes);
        self.check_names(&nodes)?;
        tracing::trace!(
            template = name,
            nodes = nodes.len(),
            dependencies = state.dependencies.len(),
            "Lowered template"
        );
        Ok(CompiledTemplate::new(
            name,
            path,
            nodes,
            state.dependencies.into_iter().collect(),
        )
        .with_missing_includes(state.missing_includes.into_iter().collect()))
    }

    /// Parse `source`, expand its includes, and resolve its inheritance chain.
    ///
    /// Includes are expanded per template before blocks move between
    /// templates, so relative names resolve against the file that wrote them.
    fn flatten(
        &self,
        source: &str,
        label: &str,
        path: Option<&Path>,
        state: &mut CompileState,
    ) -> TemplateResult<Vec<TemplateNode>> {
        let parsed = parse_template(source, label)?;
        let nodes = self.expand_includes(parsed.nodes, path, state)?;
        match parsed.extends {
            Some(extends) => self.inherit(&nodes, extends, path, state),
            None => Ok(nodes),
        }
    }

    /// Walk the `extends` chain up to the root layout and fill its blocks.
    ///
    /// The child's blocks are collected first; each ancestor only adds names
    /// no descendant has defined. Content outside the child's blocks is
    /// dropped.
    fn inherit(
        &self,
        child: &[TemplateNode],
        extends: Extends,
        child_path: Option<&Path>,
        state: &mut CompileState,
    ) -> TemplateResult<Vec<TemplateNode>> {
        let depth = state.stack.len();
        let mut blocks = BlockMap::new();
        collect_blocks(child, &mut blocks, Precedence::Replace);

        let mut next = extends;
        let mut base = child_path.map(Path::to_path_buf);
        let layout = loop {
            let path = self
                .loader
                .resolve(&next.parent, base.as_deref())
                .ok_or_else(|| TemplateError::TemplateNotFound {
                    name: next.parent.clone(),
                })?;
            self.enter(&path, state)?;
            let source = self.read(&path, state)?;
            let parsed = parse_template(&source, &path.display().to_string())?;
            let nodes = self.expand_includes(parsed.nodes, Some(&path), state)?;

            match parsed.extends {
                Some(extends) => {
                    collect_blocks(&nodes, &mut blocks, Precedence::KeepExisting);
                    next = extends;
                    base = Some(path);
                }
                None => break nodes,
            }
        };

        state.stack.truncate(depth);
        apply_blocks(layout, &blocks, self.max_depth)
    }

    fn expand_includes(
        &self,
        nodes: Vec<TemplateNode>,
        base: Option<&Path>,
        state: &mut CompileState,
    ) -> TemplateResult<Vec<TemplateNode>> {
        nodes
            .into_iter()
            .map(|node| self.expand_node(node, base, state))
            .collect()
    }

    fn expand_node(
        &self,
        node: TemplateNode,
        base: Option<&Path>,
        state: &mut CompileState,
    ) -> TemplateResult<TemplateNode> {
        Ok(match node {
            TemplateNode::Include(Include { name, location, .. }) => {
                let resolved = self.include(&name, &location, base, state)?;
                TemplateNode::Include(Include {
                    name,
                    location,
                    resolved: Some(resolved),
                })
            }
            TemplateNode::Block(Block {
                name,
                body,
                location,
            }) => TemplateNode::Block(Block {
                name,
                body: self.expand_includes(body, base, state)?,
                location,
            }),
            TemplateNode::Conditional(Conditional {
                branches,
                else_branch,
                location,
            }) => TemplateNode::Conditional(Conditional {
                branches: branches
                    .into_iter()
                    .map(|(cond, body)| Ok((cond, self.expand_includes(body, base, state)?)))
                    .collect::<TemplateResult<_>>()?,
                else_branch: else_branch
                    .map(|body| self.expand_includes(body, base, state))
                    .transpose()?,
                location,
            }),
            TemplateNode::ForLoop(ForLoop {
                key_var,
                value_var,
                iterable,
                body,
                location,
            }) => TemplateNode::ForLoop(ForLoop {
                key_var,
                value_var,
                iterable,
                body: self.expand_includes(body, base, state)?,
                location,
            }),
            TemplateNode::WhileLoop(WhileLoop {
                condition,
                body,
                location,
            }) => TemplateNode::WhileLoop(WhileLoop {
                condition,
                body: self.expand_includes(body, base, state)?,
                location,
            }),
            other @ (TemplateNode::Text(_) | TemplateNode::Output(_) | TemplateNode::Set(_)) => {
                other
            }
        })
    }

    /// Compile an included template for splicing. A missing include expands
    /// to nothing.
    fn include(
        &self,
        name: &str,
        location: &SourceLocation,
        base: Option<&Path>,
        state: &mut CompileState,
    ) -> TemplateResult<Vec<TemplateNode>> {
        let Some(path) = self.loader.resolve(name, base) else {
            if let Some(candidate) = self.loader.candidate(name, base) {
                state.missing_includes.insert(candidate);
            }
            tracing::warn!(
                include = name,
                file = %location.file,
                line = location.line,
                "Included template not found"
            );
            return Ok(Vec::new());
        };

        self.enter(&path, state)?;
        let source = self.read(&path, state)?;
        let nodes = self.flatten(&source, &path.display().to_string(), Some(&path), state)?;
        state.stack.pop();
        Ok(nodes)
    }

    /// Push `path` onto the expansion stack, rejecting cycles and runaway nesting.
    fn enter(&self, path: &Path, state: &mut CompileState) -> TemplateResult<()> {
        let name = path.display().to_string();
        if state.stack.iter().any(|p| p == path) {
            let mut chain: Vec<String> = state
                .stack
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            chain.push(name.clone());
            return Err(TemplateError::RecursiveTemplate { name, chain });
        }
        if state.stack.len() >= self.max_depth {
            return Err(TemplateError::MaxDepthExceeded {
                name,
                max_depth: self.max_depth,
            });
        }
        state.stack.push(path.to_path_buf());
        Ok(())
    }

    fn read(&self, path: &Path, state: &mut CompileState) -> TemplateResult<String> {
        let source = self.loader.load(path)?;
        state.dependencies.insert(path.to_path_buf());
        Ok(source)
    }

    /// Reject filter and function names the registry does not know.
    fn check_names(&self, nodes: &[Node]) -> TemplateResult<()> {
        let mut unknown = None;
        visit_exprs(nodes, &mut |expr, location| {
            if unknown.is_some() {
                return;
            }
            let mut filters = Vec::new();
            let mut functions = Vec::new();
            expr.visit_names(
                &mut |name| filters.push(name.to_string()),
                &mut |name| functions.push(name.to_string()),
            );

            if let Some(name) = filters.into_iter().find(|n| !self.registry.has_filter(n)) {
                unknown = Some(TemplateError::UnknownFilter {
                    name,
                    location: location.clone(),
                });
            } else if let Some(name) = functions.into_iter().find(|n| !self.registry.has_function(n)) {
                unknown = Some(TemplateError::UnknownFunction {
                    name,
                    location: location.clone(),
                });
            }
        });
        unknown.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TemplateContext;
    use crate::eval_context::EvalContext;
    use crate::evaluator::evaluate;
    use crate::loader::{FileSystemLoader, MemoryLoader};
    use crate::telemetry::UndefinedReferences;
    use pretty_assertions::assert_eq;

    struct Fixture {
        loader: MemoryLoader,
        registry: Registry,
    }

    impl Fixture {
        fn new(templates: &[(&str, &str)]) -> Self {
            Self {
                loader: MemoryLoader::with_templates(templates.iter().copied()),
                registry: Registry::with_builtins(),
            }
        }

        fn compiler(&self) -> Compiler<'_> {
            Compiler::new(&self.loader, &self.registry, 10)
        }

        fn compile(&self, name: &str) -> TemplateResult<CompiledTemplate> {
            self.compiler().compile(name)
        }

        fn render(&self, name: &str) -> String {
            let compiled = self.compile(name).unwrap();
            render_nodes(&compiled.nodes, &self.registry)
        }
    }

    fn render_nodes(nodes: &[Node], registry: &Registry) -> String {
        let vars = TemplateContext::new();
        let undefined = UndefinedReferences::new();
        let mut ctx = EvalContext::new(&vars, registry, &undefined);
        let mut out = String::new();
        evaluate(nodes, &mut ctx, &mut out).unwrap();
        out
    }

    #[test]
    fn test_child_overrides_parent_block() {
        let f = Fixture::new(&[
            ("parent", "<main>{% block content %}default{% endblock %}</main>"),
            ("child", "{% extends \"parent\" %}{% block content %}override{% endblock %}"),
        ]);
        assert_eq!(f.render("child"), "<main>override</main>");
        assert_eq!(f.render("parent"), "<main>default</main>");
    }

    #[test]
    fn test_content_outside_child_blocks_is_dropped() {
        let f = Fixture::new(&[
            ("parent", "[{% block a %}A{% endblock %}|{% block b %}B{% endblock %}]"),
            ("child", "{% extends \"parent\" %}ignored{% block b %}b{% endblock %}ignored"),
        ]);
        assert_eq!(f.render("child"), "[A|b]");
    }

    #[test]
    fn test_descendant_override_wins_over_closer_ancestor() {
        let f = Fixture::new(&[
            ("base", "{% block title %}base{% endblock %}/{% block body %}base{% endblock %}"),
            (
                "section",
                "{% extends \"base\" %}{% block title %}section{% endblock %}{% block body %}section{% endblock %}",
            ),
            ("page", "{% extends \"section\" %}{% block title %}page{% endblock %}"),
        ]);
        assert_eq!(f.render("page"), "page/section");
        assert_eq!(f.render("section"), "section/section");
    }

    #[test]
    fn test_override_can_fill_nested_block() {
        let f = Fixture::new(&[
            (
                "parent",
                "{% block outer %}<{% block inner %}i{% endblock %}>{% endblock %}",
            ),
            ("child", "{% extends \"parent\" %}{% block inner %}I{% endblock %}"),
        ]);
        assert_eq!(f.render("child"), "<I>");
    }

    #[test]
    fn test_include_is_spliced() {
        let f = Fixture::new(&[
            ("nav", "<nav>{% include \"item\" %}</nav>"),
            ("item", "<a>x</a>"),
            ("page", "{% include \"nav\" %}body"),
        ]);
        let compiled = f.compile("page").unwrap();
        assert_eq!(
            compiled.nodes,
            vec![Node::Text("<nav><a>x</a></nav>body".to_string())]
        );
        assert_eq!(
            compiled.dependencies,
            vec![PathBuf::from("page"), PathBuf::from("nav"), PathBuf::from("item")]
        );
    }

    #[test]
    fn test_missing_include_renders_empty() {
        let f = Fixture::new(&[("page", "a{% include \"gone\" %}b")]);
        assert_eq!(f.render("page"), "ab");
    }

    #[test]
    fn test_layout_includes_resolve_from_layout_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("layout")).unwrap();
        std::fs::create_dir(dir.path().join("pages")).unwrap();
        std::fs::write(
            dir.path().join("layout/base.html"),
            "[{% include \"./nav\" %}]{% block body %}{% endblock %}",
        )
        .unwrap();
        std::fs::write(dir.path().join("layout/nav.html"), "NAV").unwrap();
        std::fs::write(
            dir.path().join("pages/home.html"),
            "{% extends \"../layout/base\" %}{% block body %}home{% include \"./card\" %}{% endblock %}",
        )
        .unwrap();
        std::fs::write(dir.path().join("pages/card.html"), "+card").unwrap();

        let loader = FileSystemLoader::new(dir.path(), "html");
        let registry = Registry::with_builtins();
        let compiler = Compiler::new(&loader, &registry, 10);

        let layout = compiler.compile("layout/base").unwrap();
        assert_eq!(render_nodes(&layout.nodes, &registry), "[NAV]");
        let home = compiler.compile("pages/home").unwrap();
        assert_eq!(render_nodes(&home.nodes, &registry), "[NAV]home+card");
        assert!(home.missing_includes.is_empty());
    }

    #[test]
    fn test_missing_include_candidate_is_recorded() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("page.html"), "a{% include \"./later\" %}b").unwrap();
        let loader = FileSystemLoader::new(dir.path(), "html");
        let registry = Registry::with_builtins();

        let compiled = Compiler::new(&loader, &registry, 10).compile("page").unwrap();
        assert_eq!(compiled.missing_includes.len(), 1);
        assert!(compiled.missing_includes[0].ends_with("later.html"));
        assert_eq!(compiled.dependencies.len(), 1);
    }

    #[test]
    fn test_dependencies_cover_parent_chain() {
        let f = Fixture::new(&[
            ("base", "{% block b %}{% include \"footer\" %}{% endblock %}"),
            ("footer", "F"),
            ("page", "{% extends \"base\" %}"),
        ]);
        let compiled = f.compile("page").unwrap();
        assert_eq!(
            compiled.dependencies,
            vec![PathBuf::from("page"), PathBuf::from("base"), PathBuf::from("footer")]
        );
        assert_eq!(compiled.path, PathBuf::from("page"));
        assert_eq!(compiled.name, "page");
    }

    #[test]
    fn test_missing_template_and_parent() {
        let f = Fixture::new(&[("orphan", "{% extends \"nowhere\" %}")]);
        assert!(matches!(
            f.compile("missing"),
            Err(TemplateError::TemplateNotFound { name }) if name == "missing"
        ));
        assert!(matches!(
            f.compile("orphan"),
            Err(TemplateError::TemplateNotFound { name }) if name == "nowhere"
        ));
    }

    #[test]
    fn test_include_cycle_is_rejected() {
        let f = Fixture::new(&[("a", "{% include \"b\" %}"), ("b", "{% include \"a\" %}")]);
        match f.compile("a") {
            Err(TemplateError::RecursiveTemplate { name, chain }) => {
                assert_eq!(name, "a");
                assert_eq!(chain, vec!["a", "b", "a"]);
            }
            other => panic!("expected recursion error, got {other:?}"),
        }
    }

    #[test]
    fn test_extends_cycle_is_rejected() {
        let f = Fixture::new(&[
            ("a", "{% extends \"b\" %}"),
            ("b", "{% extends \"a\" %}"),
        ]);
        assert!(matches!(
            f.compile("a"),
            Err(TemplateError::RecursiveTemplate { .. })
        ));
    }

    #[test]
    fn test_include_of_self_through_layout_is_rejected() {
        let f = Fixture::new(&[
            ("layout", "{% block body %}{% endblock %}{% include \"page\" %}"),
            ("page", "{% extends \"layout\" %}"),
        ]);
        assert!(matches!(
            f.compile("page"),
            Err(TemplateError::RecursiveTemplate { .. })
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let f = Fixture::new(&[
            ("a", "{% include \"b\" %}"),
            ("b", "{% include \"c\" %}"),
            ("c", "end"),
        ]);
        let shallow = Compiler::new(&f.loader, &f.registry, 2);
        assert!(matches!(
            shallow.compile("a"),
            Err(TemplateError::MaxDepthExceeded { max_depth: 2, .. })
        ));
        assert_eq!(f.render("a"), "end");
    }

    #[test]
    fn test_unknown_names_fail_at_compile_time() {
        let f = Fixture::new(&[
            ("filter", "line\n{{ name|shout }}"),
            ("function", "{% if ready and asset(\"x\") %}{% endif %}"),
        ]);
        match f.compile("filter") {
            Err(TemplateError::UnknownFilter { name, location }) => {
                assert_eq!(name, "shout");
                assert_eq!(location, SourceLocation::new("filter", 2, 1));
            }
            other => panic!("expected unknown filter, got {other:?}"),
        }
        assert!(matches!(
            f.compile("function"),
            Err(TemplateError::UnknownFunction { name, .. }) if name == "asset"
        ));
    }

    #[test]
    fn test_registered_host_function_passes_check() {
        let mut f = Fixture::new(&[("page", "{{ asset(\"app.css\") }}")]);
        f.registry
            .add_function("asset", |args| Ok(format!("/static/{}", args[0].render()).into()));
        assert_eq!(f.render("page"), "/static/app.css");
    }

    #[test]
    fn test_compile_source_resolves_against_root() {
        let f = Fixture::new(&[("layout", "<{% block body %}{% endblock %}>")]);
        let compiled = f
            .compiler()
            .compile_source("inline", "{% extends \"layout\" %}{% block body %}hi{% endblock %}")
            .unwrap();
        assert_eq!(render_nodes(&compiled.nodes, &f.registry), "<hi>");
        assert_eq!(compiled.dependencies, vec![PathBuf::from("layout")]);
    }
}
