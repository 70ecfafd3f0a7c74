//! Lowers the tree-sitter concrete syntax tree into the owned [`ast`](super::ast).
//!
//! Anything outside the supported subset is a compile error naming the line.

use std::sync::Arc;

use agent_policy::syntax::{StringPiece, named_children, node_text, string_pieces};
use tree_sitter::Node;

use super::ast::{
    BinOp, CmpOp, Comprehension, Expr, FStringPart, FunctionDef, Handler, Param, Stmt, Target,
    UnaryOp,
};
use super::value::Value;
use crate::{ToolError, ToolResult};

pub(crate) struct Lowerer<'src> {
    source: &'src str,
}

impl<'src> Lowerer<'src> {
    pub(crate) fn new(source: &'src str) -> Self {
        Self { source }
    }

    fn text(&self, node: Node<'_>) -> &'src str {
        node_text(node, self.source)
    }

    fn unsupported(node: Node<'_>, what: &str) -> ToolError {
        ToolError::compile(format!(
            "line {}: {what} is not supported in tool scripts",
            node.start_position().row + 1
        ))
    }

    fn field<'tree>(node: Node<'tree>, name: &str) -> ToolResult<Node<'tree>> {
        node.child_by_field_name(name).ok_or_else(|| {
            ToolError::compile(format!(
                "line {}: malformed `{}` (missing {name})",
                node.start_position().row + 1,
                node.kind()
            ))
        })
    }

    pub(crate) fn block(&self, node: Node<'_>) -> ToolResult<Vec<Stmt>> {
        named_children(node)
            .into_iter()
            .map(|stmt| self.statement(stmt))
            .collect()
    }

    fn statement(&self, node: Node<'_>) -> ToolResult<Stmt> {
        match node.kind() {
            "expression_statement" => {
                let children = named_children(node);
                match children.as_slice() {
                    [single] if single.kind() == "assignment" => self.assignment(*single),
                    [single] if single.kind() == "augmented_assignment" => {
                        self.augmented_assignment(*single)
                    }
                    [single] => Ok(Stmt::Expr(self.expr(*single)?)),
                    many => Ok(Stmt::Expr(Expr::Tuple(
                        many.iter()
                            .map(|child| self.expr(*child))
                            .collect::<ToolResult<_>>()?,
                    ))),
                }
            }
            "return_statement" => Ok(Stmt::Return(
                named_children(node)
                    .first()
                    .map(|value| self.expr(*value))
                    .transpose()?,
            )),
            "if_statement" => self.if_statement(node),
            "for_statement" => {
                if self.text(node).starts_with("async") {
                    return Err(Self::unsupported(node, "`async for`"));
                }
                Ok(Stmt::For {
                    target: self.target(Self::field(node, "left")?)?,
                    iter: self.expr(Self::field(node, "right")?)?,
                    body: self.block(Self::field(node, "body")?)?,
                    orelse: self.else_body(node)?,
                })
            }
            "while_statement" => Ok(Stmt::While {
                test: self.expr(Self::field(node, "condition")?)?,
                body: self.block(Self::field(node, "body")?)?,
                orelse: self.else_body(node)?,
            }),
            "try_statement" => self.try_statement(node),
            "raise_statement" => Ok(Stmt::Raise(
                named_children(node)
                    .first()
                    .map(|value| self.expr(*value))
                    .transpose()?,
            )),
            "assert_statement" => {
                let children = named_children(node);
                let test = children
                    .first()
                    .ok_or_else(|| Self::unsupported(node, "empty `assert`"))?;
                Ok(Stmt::Assert {
                    test: self.expr(*test)?,
                    message: children.get(1).map(|msg| self.expr(*msg)).transpose()?,
                })
            }
            "import_statement" => {
                let mut bindings = Vec::new();
                for name in named_children(node) {
                    let (module, alias) = if name.kind() == "aliased_import" {
                        (
                            self.text(Self::field(name, "name")?),
                            Some(self.text(Self::field(name, "alias")?)),
                        )
                    } else {
                        (self.text(name), None)
                    };
                    if module.contains('.') {
                        return Err(Self::unsupported(name, "importing a submodule"));
                    }
                    bindings.push((module.to_owned(), alias.unwrap_or(module).to_owned()));
                }
                Ok(Stmt::Import(bindings))
            }
            "import_from_statement" => {
                let module = self.text(Self::field(node, "module_name")?).to_owned();
                let mut cursor = node.walk();
                let mut names = Vec::new();
                for name in node.children_by_field_name("name", &mut cursor) {
                    let (attr, alias) = if name.kind() == "aliased_import" {
                        (
                            self.text(Self::field(name, "name")?),
                            self.text(Self::field(name, "alias")?),
                        )
                    } else {
                        (self.text(name), self.text(name))
                    };
                    names.push((attr.to_owned(), alias.to_owned()));
                }
                if names.is_empty() {
                    return Err(Self::unsupported(node, "wildcard import"));
                }
                Ok(Stmt::ImportFrom { module, names })
            }
            "function_definition" => Ok(Stmt::Def(Arc::new(self.function(node)?))),
            "pass_statement" => Ok(Stmt::Pass),
            "break_statement" => Ok(Stmt::Break),
            "continue_statement" => Ok(Stmt::Continue),
            "decorated_definition" => Err(Self::unsupported(node, "a decorator")),
            "class_definition" => Err(Self::unsupported(node, "a class definition")),
            "with_statement" => Err(Self::unsupported(node, "a `with` block")),
            "global_statement" | "nonlocal_statement" => {
                Err(Self::unsupported(node, "rebinding outer variables"))
            }
            other => Err(Self::unsupported(node, &format!("`{other}`"))),
        }
    }

    pub(crate) fn function(&self, node: Node<'_>) -> ToolResult<FunctionDef> {
        if self.text(node).starts_with("async") {
            return Err(Self::unsupported(node, "`async def`"));
        }
        let name = self.text(Self::field(node, "name")?).to_owned();
        let mut params = Vec::new();
        let mut positional_limit = None;

        for param in named_children(Self::field(node, "parameters")?) {
            match param.kind() {
                "identifier" => params.push(Param {
                    name: self.text(param).to_owned(),
                    annotation: None,
                    default: None,
                }),
                "typed_parameter" => {
                    let inner = named_children(param)
                        .into_iter()
                        .next()
                        .ok_or_else(|| Self::unsupported(param, "this parameter"))?;
                    if inner.kind() != "identifier" {
                        return Err(Self::unsupported(param, "a variadic parameter"));
                    }
                    params.push(Param {
                        name: self.text(inner).to_owned(),
                        annotation: param
                            .child_by_field_name("type")
                            .map(|ty| self.text(ty).trim().to_owned()),
                        default: None,
                    });
                }
                "default_parameter" | "typed_default_parameter" => params.push(Param {
                    name: self.text(Self::field(param, "name")?).to_owned(),
                    annotation: param
                        .child_by_field_name("type")
                        .map(|ty| self.text(ty).trim().to_owned()),
                    default: Some(self.expr(Self::field(param, "value")?)?),
                }),
                "keyword_separator" => {
                    positional_limit.get_or_insert(params.len());
                }
                "positional_separator" => {}
                _ => return Err(Self::unsupported(param, "a variadic parameter")),
            }
        }

        Ok(FunctionDef {
            name,
            positional_limit: positional_limit.unwrap_or(params.len()),
            params,
            body: self.block(Self::field(node, "body")?)?,
        })
    }

    fn assignment(&self, node: Node<'_>) -> ToolResult<Stmt> {
        let mut targets = Vec::new();
        let mut current = node;
        loop {
            targets.push(self.target(Self::field(current, "left")?)?);
            match current.child_by_field_name("right") {
                None => return Ok(Stmt::Pass),
                Some(right) if right.kind() == "assignment" => current = right,
                Some(right) => {
                    return Ok(Stmt::Assign {
                        targets,
                        value: self.expr(right)?,
                    });
                }
            }
        }
    }

    fn augmented_assignment(&self, node: Node<'_>) -> ToolResult<Stmt> {
        let operator = Self::field(node, "operator")?;
        let op = BinOp::from_token(operator.kind())
            .ok_or_else(|| Self::unsupported(operator, &format!("`{}`", operator.kind())))?;
        Ok(Stmt::AugAssign {
            target: self.target(Self::field(node, "left")?)?,
            op,
            value: self.expr(Self::field(node, "right")?)?,
        })
    }

    fn if_statement(&self, node: Node<'_>) -> ToolResult<Stmt> {
        let mut branches = vec![(
            self.expr(Self::field(node, "condition")?)?,
            self.block(Self::field(node, "consequence")?)?,
        )];
        let mut orelse = Vec::new();
        let mut cursor = node.walk();
        for alternative in node.children_by_field_name("alternative", &mut cursor) {
            match alternative.kind() {
                "elif_clause" => branches.push((
                    self.expr(Self::field(alternative, "condition")?)?,
                    self.block(Self::field(alternative, "consequence")?)?,
                )),
                _ => orelse = self.block(Self::field(alternative, "body")?)?,
            }
        }
        Ok(Stmt::If { branches, orelse })
    }

    fn else_body(&self, node: Node<'_>) -> ToolResult<Vec<Stmt>> {
        match node.child_by_field_name("alternative") {
            Some(clause) => self.block(Self::field(clause, "body")?),
            None => Ok(Vec::new()),
        }
    }

    fn try_statement(&self, node: Node<'_>) -> ToolResult<Stmt> {
        let body = self.block(Self::field(node, "body")?)?;
        let mut handlers = Vec::new();
        let mut orelse = Vec::new();
        let mut finally = Vec::new();

        for clause in named_children(node) {
            match clause.kind() {
                "except_clause" => handlers.push(self.handler(clause)?),
                "else_clause" => orelse = self.block(Self::field(clause, "body")?)?,
                "finally_clause" => {
                    if let Some(block) = named_children(clause)
                        .into_iter()
                        .find(|child| child.kind() == "block")
                    {
                        finally = self.block(block)?;
                    }
                }
                "except_group_clause" => return Err(Self::unsupported(clause, "`except*`")),
                _ => {}
            }
        }

        Ok(Stmt::Try {
            body,
            handlers,
            orelse,
            finally,
        })
    }

    fn handler(&self, clause: Node<'_>) -> ToolResult<Handler> {
        let children = named_children(clause);
        let (blocks, mut heads): (Vec<Node<'_>>, Vec<Node<'_>>) =
            children.into_iter().partition(|child| child.kind() == "block");
        let body = match blocks.last() {
            Some(block) => self.block(*block)?,
            None => Vec::new(),
        };

        // `except E as e` parses either as two expressions or one `as_pattern`.
        if let [pattern] = heads.as_slice() {
            if pattern.kind() == "as_pattern" {
                heads = named_children(*pattern);
            }
        }

        let kinds = match heads.first() {
            None => Vec::new(),
            Some(kind) => self.exception_names(*kind)?,
        };
        let binding = heads.get(1).map(|alias| {
            let alias = named_children(*alias)
                .into_iter()
                .next()
                .filter(|_| alias.kind() == "as_pattern_target")
                .unwrap_or(*alias);
            self.text(alias).to_owned()
        });

        Ok(Handler {
            kinds,
            binding,
            body,
        })
    }

    fn exception_names(&self, node: Node<'_>) -> ToolResult<Vec<String>> {
        match node.kind() {
            "identifier" => Ok(vec![self.text(node).to_owned()]),
            "tuple" | "parenthesized_expression" => named_children(node)
                .into_iter()
                .map(|child| self.exception_names(child))
                .collect::<ToolResult<Vec<_>>>()
                .map(|names| names.into_iter().flatten().collect()),
            _ => Err(Self::unsupported(node, "this exception filter")),
        }
    }

    fn target(&self, node: Node<'_>) -> ToolResult<Target> {
        match node.kind() {
            "identifier" => Ok(Target::Name(self.text(node).to_owned())),
            "pattern_list" | "tuple_pattern" | "list_pattern" | "expression_list" | "tuple"
            | "list" => Ok(Target::Unpack(
                named_children(node)
                    .into_iter()
                    .map(|child| self.target(child))
                    .collect::<ToolResult<_>>()?,
            )),
            "parenthesized_expression" => match named_children(node).as_slice() {
                [inner] => self.target(*inner),
                _ => Err(Self::unsupported(node, "this assignment target")),
            },
            "subscript" => Ok(Target::Subscript {
                value: self.expr(Self::field(node, "value")?)?,
                index: self.index(node)?,
            }),
            "attribute" => Err(Self::unsupported(node, "attribute assignment")),
            _ => Err(Self::unsupported(node, "this assignment target")),
        }
    }

    fn index(&self, subscript: Node<'_>) -> ToolResult<Expr> {
        let mut cursor = subscript.walk();
        let parts: Vec<Node<'_>> = subscript
            .children_by_field_name("subscript", &mut cursor)
            .collect();
        match parts.as_slice() {
            [single] => self.expr(*single),
            [] => Err(Self::unsupported(subscript, "an empty subscript")),
            many => Ok(Expr::Tuple(
                many.iter()
                    .map(|part| self.expr(*part))
                    .collect::<ToolResult<_>>()?,
            )),
        }
    }

    fn exprs(&self, nodes: Vec<Node<'_>>) -> ToolResult<Vec<Expr>> {
        nodes.into_iter().map(|node| self.expr(node)).collect()
    }

    #[allow(clippy::too_many_lines)]
    pub(crate) fn expr(&self, node: Node<'_>) -> ToolResult<Expr> {
        let boxed = |node: Node<'_>| self.expr(node).map(Box::new);
        match node.kind() {
            "identifier" => Ok(Expr::Name(self.text(node).to_owned())),
            "integer" => Ok(Expr::Const(self.integer(node)?)),
            "float" => {
                let text = self.text(node).replace('_', "");
                if text.ends_with(['j', 'J']) {
                    return Err(Self::unsupported(node, "a complex number"));
                }
                text.parse::<f64>()
                    .map(|value| Expr::Const(Value::Float(value)))
                    .map_err(|_| Self::unsupported(node, "this float literal"))
            }
            "true" => Ok(Expr::Const(Value::Bool(true))),
            "false" => Ok(Expr::Const(Value::Bool(false))),
            "none" => Ok(Expr::Const(Value::None)),
            "string" | "concatenated_string" => self.string(node),
            "list" => Ok(Expr::List(self.exprs(self.no_splats(node)?)?)),
            "tuple" | "expression_list" => Ok(Expr::Tuple(self.exprs(self.no_splats(node)?)?)),
            "dictionary" => {
                let mut pairs = Vec::new();
                for pair in named_children(node) {
                    if pair.kind() != "pair" {
                        return Err(Self::unsupported(pair, "dictionary unpacking"));
                    }
                    pairs.push((
                        self.expr(Self::field(pair, "key")?)?,
                        self.expr(Self::field(pair, "value")?)?,
                    ));
                }
                Ok(Expr::Dict(pairs))
            }
            "parenthesized_expression" => match named_children(node).as_slice() {
                [inner] => self.expr(*inner),
                _ => Err(Self::unsupported(node, "this parenthesized expression")),
            },
            "attribute" => Ok(Expr::Attribute {
                value: boxed(Self::field(node, "object")?)?,
                attr: self.text(Self::field(node, "attribute")?).to_owned(),
            }),
            "subscript" => Ok(Expr::Subscript {
                value: boxed(Self::field(node, "value")?)?,
                index: Box::new(self.index(node)?),
            }),
            "slice" => {
                let mut slots: [Option<Box<Expr>>; 3] = [None, None, None];
                let mut slot = 0;
                for index in 0..node.child_count() {
                    let Some(child) = node.child(index) else {
                        continue;
                    };
                    if child.kind() == ":" {
                        slot += 1;
                    } else if child.is_named() && child.kind() != "comment" && slot < 3 {
                        slots[slot] = Some(boxed(child)?);
                    }
                }
                let [lower, upper, step] = slots;
                Ok(Expr::Slice { lower, upper, step })
            }
            "call" => self.call(node),
            "binary_operator" => {
                let operator = Self::field(node, "operator")?;
                let op = BinOp::from_token(operator.kind()).ok_or_else(|| {
                    Self::unsupported(operator, &format!("operator `{}`", operator.kind()))
                })?;
                Ok(Expr::Binary {
                    op,
                    left: boxed(Self::field(node, "left")?)?,
                    right: boxed(Self::field(node, "right")?)?,
                })
            }
            "unary_operator" => {
                let operator = Self::field(node, "operator")?;
                let op = match operator.kind() {
                    "-" => UnaryOp::Neg,
                    "+" => UnaryOp::Pos,
                    other => return Err(Self::unsupported(operator, &format!("operator `{other}`"))),
                };
                Ok(Expr::Unary {
                    op,
                    operand: boxed(Self::field(node, "argument")?)?,
                })
            }
            "not_operator" => Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: boxed(Self::field(node, "argument")?)?,
            }),
            "boolean_operator" => Ok(Expr::BoolOp {
                and: Self::field(node, "operator")?.kind() == "and",
                left: boxed(Self::field(node, "left")?)?,
                right: boxed(Self::field(node, "right")?)?,
            }),
            "comparison_operator" => self.comparison(node),
            "conditional_expression" => match named_children(node).as_slice() {
                [body, test, orelse] => Ok(Expr::IfElse {
                    body: boxed(*body)?,
                    test: boxed(*test)?,
                    orelse: boxed(*orelse)?,
                }),
                _ => Err(Self::unsupported(node, "this conditional expression")),
            },
            "list_comprehension" | "generator_expression" => self.comprehension(node),
            "lambda" => Err(Self::unsupported(node, "`lambda`")),
            "set" | "set_comprehension" => Err(Self::unsupported(node, "a set")),
            "dictionary_comprehension" => Err(Self::unsupported(node, "a dict comprehension")),
            "await" => Err(Self::unsupported(node, "`await`")),
            "named_expression" => Err(Self::unsupported(node, "`:=`")),
            other => Err(Self::unsupported(node, &format!("`{other}`"))),
        }
    }

    fn no_splats<'tree>(&self, node: Node<'tree>) -> ToolResult<Vec<Node<'tree>>> {
        let children = named_children(node);
        if let Some(splat) = children
            .iter()
            .find(|child| child.kind() == "list_splat" || child.kind() == "dictionary_splat")
        {
            return Err(Self::unsupported(*splat, "unpacking with `*`"));
        }
        Ok(children)
    }

    fn integer(&self, node: Node<'_>) -> ToolResult<Value> {
        let text = self.text(node).replace('_', "").to_ascii_lowercase();
        let parsed = if let Some(hex) = text.strip_prefix("0x") {
            i64::from_str_radix(hex, 16)
        } else if let Some(octal) = text.strip_prefix("0o") {
            i64::from_str_radix(octal, 8)
        } else if let Some(binary) = text.strip_prefix("0b") {
            i64::from_str_radix(binary, 2)
        } else {
            text.parse::<i64>()
        };
        match parsed {
            Ok(value) => Ok(Value::Int(value)),
            Err(_) => text
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| Self::unsupported(node, "this integer literal")),
        }
    }

    fn string(&self, node: Node<'_>) -> ToolResult<Expr> {
        let strings = if node.kind() == "concatenated_string" {
            named_children(node)
        } else {
            vec![node]
        };

        let mut parts = Vec::new();
        for string in strings {
            let prefix: String = self
                .text(string)
                .chars()
                .take_while(char::is_ascii_alphabetic)
                .collect();
            if prefix.contains(['b', 'B']) {
                return Err(Self::unsupported(string, "a bytes literal"));
            }
            for piece in string_pieces(string, self.source) {
                match piece {
                    StringPiece::Text(text) => parts.push(FStringPart::Literal(text)),
                    StringPiece::Interpolation {
                        expression,
                        format_spec,
                    } => parts.push(FStringPart::Field {
                        expr: self.expr(expression)?,
                        spec: format_spec,
                    }),
                }
            }
        }

        if parts
            .iter()
            .all(|part| matches!(part, FStringPart::Literal(_)))
        {
            let text: String = parts
                .into_iter()
                .filter_map(|part| match part {
                    FStringPart::Literal(text) => Some(text),
                    FStringPart::Field { .. } => None,
                })
                .collect();
            return Ok(Expr::Const(Value::Str(text)));
        }
        Ok(Expr::FString(parts))
    }

    fn call(&self, node: Node<'_>) -> ToolResult<Expr> {
        let func = Box::new(self.expr(Self::field(node, "function")?)?);
        let arguments = Self::field(node, "arguments")?;
        if arguments.kind() == "generator_expression" {
            return Ok(Expr::Call {
                func,
                args: vec![self.comprehension(arguments)?],
                kwargs: Vec::new(),
            });
        }

        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        for argument in named_children(arguments) {
            match argument.kind() {
                "keyword_argument" => kwargs.push((
                    self.text(Self::field(argument, "name")?).to_owned(),
                    self.expr(Self::field(argument, "value")?)?,
                )),
                "list_splat" | "dictionary_splat" => {
                    return Err(Self::unsupported(argument, "argument unpacking"));
                }
                _ => args.push(self.expr(argument)?),
            }
        }
        Ok(Expr::Call { func, args, kwargs })
    }

    fn comparison(&self, node: Node<'_>) -> ToolResult<Expr> {
        let mut left = None;
        let mut rest = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for index in 0..node.child_count() {
            let Some(child) = node.child(index) else {
                continue;
            };
            if child.kind() == "comment" {
                continue;
            }
            if !child.is_named() {
                pending.push(child.kind());
                continue;
            }
            let operand = self.expr(child)?;
            if left.is_none() {
                left = Some(operand);
                continue;
            }
            let token = pending.join(" ");
            pending.clear();
            let op = CmpOp::from_token(&token)
                .ok_or_else(|| Self::unsupported(node, &format!("comparison `{token}`")))?;
            rest.push((op, operand));
        }

        let left = left.ok_or_else(|| Self::unsupported(node, "an empty comparison"))?;
        Ok(Expr::Compare {
            left: Box::new(left),
            rest,
        })
    }

    fn comprehension(&self, node: Node<'_>) -> ToolResult<Expr> {
        let element = Box::new(self.expr(Self::field(node, "body")?)?);
        let mut clauses = Vec::new();
        for clause in named_children(node).into_iter().skip(1) {
            match clause.kind() {
                "for_in_clause" => clauses.push(Comprehension::For {
                    target: self.target(Self::field(clause, "left")?)?,
                    iter: self.expr(Self::field(clause, "right")?)?,
                }),
                "if_clause" => {
                    let condition = named_children(clause)
                        .into_iter()
                        .next()
                        .ok_or_else(|| Self::unsupported(clause, "an empty `if` clause"))?;
                    clauses.push(Comprehension::If(self.expr(condition)?));
                }
                _ => return Err(Self::unsupported(clause, "this comprehension clause")),
            }
        }
        Ok(Expr::ListComp { element, clauses })
    }
}
