//! Single-pass bytecode compiler.
//!
//! Parsing and code generation are interleaved: the compiler pulls tokens
//! from the scanner and appends bytecode to the current function's chunk as
//! it goes, with no intermediate tree. Expressions are parsed with a Pratt
//! table ([`rule`]) mapping each token kind to an optional prefix action, an
//! optional infix action, and an infix precedence; [`Compiler::parse_precedence`]
//! drives the table. The actions are free functions so they coerce to plain
//! function pointers in the table.
//!
//! Forward branches are emitted with placeholder offsets and patched once
//! the target is known. Errors put the parser into panic mode, which
//! suppresses cascading reports until [`Compiler::synchronize`] reaches a
//! statement boundary; compilation continues so one run reports one error
//! per statement, but a set `had_error` flag fails the whole compile and
//! none of the bytecode is ever executed.

use std::rc::Rc;

use tracing::debug;

use crate::bytecode::{Chunk, OpCode};
use crate::error::{Error, Result};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::value::{Function, Interner, Value};

/// Local slots are addressed by a one-byte operand.
const MAX_LOCALS: usize = 256;

/// Compile `source` into the top-level script function.
///
/// The interner is borrowed from the VM so that string constants created
/// here share identity with strings the VM creates at runtime.
pub fn compile(source: &str, strings: &mut Interner) -> Result<Rc<Function>> {
    let mut compiler = Compiler::new(source, strings);
    compiler.advance();
    while !compiler.matches(TokenKind::Eof) {
        compiler.declaration();
    }
    compiler.finish()
}

// ---------------------------------------------------------------------------
// Precedence and the parse-rule table
// ---------------------------------------------------------------------------

/// Expression precedence levels, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    /// `=`
    Assignment,
    /// `or`
    Or,
    /// `and`
    And,
    /// `==` `!=`
    Equality,
    /// `<` `>` `<=` `>=`
    Comparison,
    /// `+` `-`
    Term,
    /// `*` `/`
    Factor,
    /// `!` `-`
    Unary,
    /// `(`
    Call,
    Primary,
}

impl Precedence {
    /// The next-higher level; used to make binary operators left-associative.
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

/// A parse action. The flag says whether an `=` following the parsed
/// expression may be treated as assignment.
type ParseFn = for<'src, 'i> fn(&mut Compiler<'src, 'i>, bool);

struct ParseRule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

/// The Pratt table. Token kinds without an entry parse as neither prefix nor
/// infix and carry no precedence.
fn rule(kind: TokenKind) -> ParseRule {
    let (prefix, infix, precedence): (Option<ParseFn>, Option<ParseFn>, Precedence) = match kind {
        TokenKind::LeftParen => (Some(grouping), Some(call), Precedence::Call),
        TokenKind::Minus => (Some(unary), Some(binary), Precedence::Term),
        TokenKind::Plus => (None, Some(binary), Precedence::Term),
        TokenKind::Slash | TokenKind::Star => (None, Some(binary), Precedence::Factor),
        TokenKind::Bang => (Some(unary), None, Precedence::None),
        TokenKind::BangEqual | TokenKind::EqualEqual => {
            (None, Some(binary), Precedence::Equality)
        }
        TokenKind::Greater
        | TokenKind::GreaterEqual
        | TokenKind::Less
        | TokenKind::LessEqual => (None, Some(binary), Precedence::Comparison),
        TokenKind::Identifier => (Some(variable), None, Precedence::None),
        TokenKind::String => (Some(string), None, Precedence::None),
        TokenKind::Number => (Some(number), None, Precedence::None),
        TokenKind::And => (None, Some(and_operator), Precedence::And),
        TokenKind::Or => (None, Some(or_operator), Precedence::Or),
        TokenKind::False | TokenKind::Nil | TokenKind::True => {
            (Some(literal), None, Precedence::None)
        }
        _ => (None, None, Precedence::None),
    };
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

// ---------------------------------------------------------------------------
// Compiler state
// ---------------------------------------------------------------------------

struct Parser<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<String>,
}

/// A declared local variable. `depth` is `None` from declaration until the
/// initializer has been compiled, which is what makes `var a = a;` inside a
/// scope detectable.
struct Local<'src> {
    name: &'src str,
    depth: Option<u32>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
}

/// Per-function compilation state. Function declarations nest, so the
/// compiler keeps a stack of these; the innermost one owns the chunk
/// currently being emitted to.
struct FnContext<'src> {
    function: Function,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    scope_depth: u32,
}

impl FnContext<'_> {
    fn new(function: Function, kind: FunctionKind) -> Self {
        // Slot 0 of every call frame holds the function object itself, so
        // the compiler claims it with a name no identifier can collide with.
        Self {
            function,
            kind,
            locals: vec![Local {
                name: "",
                depth: Some(0),
            }],
            scope_depth: 0,
        }
    }
}

struct Compiler<'src, 'i> {
    parser: Parser<'src>,
    strings: &'i mut Interner,
    contexts: Vec<FnContext<'src>>,
}

impl<'src, 'i> Compiler<'src, 'i> {
    fn new(source: &'src str, strings: &'i mut Interner) -> Self {
        let placeholder = Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: 1,
        };
        Self {
            parser: Parser {
                scanner: Scanner::new(source),
                current: placeholder,
                previous: placeholder,
                had_error: false,
                panic_mode: false,
                errors: Vec::new(),
            },
            strings,
            contexts: vec![FnContext::new(Function::new(None), FunctionKind::Script)],
        }
    }

    fn finish(mut self) -> Result<Rc<Function>> {
        self.emit_return();
        if self.parser.had_error {
            return Err(Error::Compile(self.parser.errors));
        }
        let function = self.contexts.pop().unwrap().function;
        debug!(target: "lark::compiler", "\n{}", function.chunk.disassemble("<script>"));
        Ok(Rc::new(function))
    }

    fn ctx(&self) -> &FnContext<'src> {
        self.contexts.last().unwrap()
    }

    fn ctx_mut(&mut self) -> &mut FnContext<'src> {
        self.contexts.last_mut().unwrap()
    }

    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.ctx_mut().function.chunk
    }

    // -----------------------------------------------------------------------
    // Token plumbing
    // -----------------------------------------------------------------------

    /// Move to the next real token, reporting any error tokens in between.
    fn advance(&mut self) {
        self.parser.previous = self.parser.current;
        loop {
            self.parser.current = self.parser.scanner.scan_token();
            if self.parser.current.kind != TokenKind::Error {
                break;
            }
            let message = self.parser.current.lexeme;
            self.error_at_current(message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.parser.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.parser.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // -----------------------------------------------------------------------
    // Error reporting
    // -----------------------------------------------------------------------

    fn error(&mut self, message: &str) {
        self.error_at(self.parser.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.parser.current, message);
    }

    /// Record a diagnostic unless the parser is already panicking. The first
    /// error in a statement wins; the rest are noise from a confused parser.
    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.parser.panic_mode {
            return;
        }
        self.parser.panic_mode = true;
        let location = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        self.parser
            .errors
            .push(format!("[line {}] Error{}: {}", token.line, location, message));
        self.parser.had_error = true;
    }

    /// Leave panic mode by skipping to the next statement boundary.
    fn synchronize(&mut self) {
        self.parser.panic_mode = false;
        while self.parser.current.kind != TokenKind::Eof {
            if self.parser.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.parser.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // -----------------------------------------------------------------------
    // Emit helpers
    // -----------------------------------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        let line = self.parser.previous.line;
        self.current_chunk().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_return(&mut self) {
        self.emit_op(OpCode::Nil);
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.current_chunk().add_constant(value);
        if index > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        index as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_op(OpCode::Constant);
        self.emit_byte(index);
    }

    /// Emit a forward branch with a placeholder offset; returns the offset
    /// of the placeholder for [`Compiler::patch_jump`].
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().code.len() - 2
    }

    /// Backpatch a placeholder emitted by [`Compiler::emit_jump`] to land on
    /// the next instruction to be emitted.
    fn patch_jump(&mut self, offset: usize) {
        // -2 because the jump distance is measured from after the operand.
        let jump = self.current_chunk().code.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        let [hi, lo] = (jump as u16).to_be_bytes();
        let chunk = self.current_chunk();
        chunk.code[offset] = hi;
        chunk.code[offset + 1] = lo;
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.current_chunk().code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        let [hi, lo] = (offset as u16).to_be_bytes();
        self.emit_byte(hi);
        self.emit_byte(lo);
    }

    // -----------------------------------------------------------------------
    // Declarations and statements
    // -----------------------------------------------------------------------

    fn declaration(&mut self) {
        if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.parser.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    /// An expression evaluated for its effect; the value is discarded.
    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // Initialized before the body compiles, so the function can recurse.
        self.mark_initialized();
        self.function();
        self.define_variable(global);
    }

    /// Compile a function body in a fresh context and emit the finished
    /// function as a constant of the enclosing chunk.
    fn function(&mut self) {
        let name = self.strings.intern(self.parser.previous.lexeme);
        self.contexts.push(FnContext::new(
            Function::new(Some(name)),
            FunctionKind::Function,
        ));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.ctx().function.arity == u8::MAX {
                    self.error_at_current("Cannot have more than 255 parameters.");
                } else {
                    self.ctx_mut().function.arity += 1;
                }
                let param = self.parse_variable("Expect parameter name.");
                self.define_variable(param);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();
        self.emit_return();

        // The context (and its scope) dies with the function; no pops needed.
        let function = self.contexts.pop().unwrap().function;
        if !self.parser.had_error {
            debug!(
                target: "lark::compiler",
                "\n{}",
                function.chunk.disassemble(&function.to_string())
            );
        }
        self.emit_constant(Value::Function(Rc::new(function)));
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn return_statement(&mut self) {
        if self.ctx().kind == FunctionKind::Script {
            self.error("Cannot return from top-level code.");
        }
        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    /// `for (init; cond; incr) body`, desugared while compiling.
    ///
    /// The increment clause appears in source before the body but runs after
    /// it, so the compiler jumps over the compiled increment into the body
    /// and loops back through it.
    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.matches(TokenKind::Semicolon) {
            // No initializer.
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().code.len();
        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().code.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");
            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    // -----------------------------------------------------------------------
    // Scopes and variables
    // -----------------------------------------------------------------------

    fn begin_scope(&mut self) {
        self.ctx_mut().scope_depth += 1;
    }

    /// Close the scope, popping every local declared inside it.
    fn end_scope(&mut self) {
        self.ctx_mut().scope_depth -= 1;
        loop {
            let ctx = self.ctx();
            let Some(local) = ctx.locals.last() else { break };
            if local.depth.unwrap_or(u32::MAX) <= ctx.scope_depth {
                break;
            }
            self.ctx_mut().locals.pop();
            self.emit_op(OpCode::Pop);
        }
    }

    /// Parse an identifier in declaration position. For globals, returns the
    /// constant-pool index of the name; for locals, the name is recorded in
    /// the scope instead and the return value is unused.
    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.ctx().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.parser.previous)
    }

    fn identifier_constant(&mut self, name: Token<'src>) -> u8 {
        let interned = self.strings.intern(name.lexeme);
        self.make_constant(Value::Str(interned))
    }

    /// Record a new, not-yet-initialized local. Globals are late-bound and
    /// skip this entirely.
    fn declare_variable(&mut self) {
        if self.ctx().scope_depth == 0 {
            return;
        }
        let name = self.parser.previous.lexeme;
        let mut collision = false;
        for local in self.ctx().locals.iter().rev() {
            if let Some(depth) = local.depth {
                if depth < self.ctx().scope_depth {
                    break;
                }
            }
            if local.name == name {
                collision = true;
                break;
            }
        }
        if collision {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: &'src str) {
        if self.ctx().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.ctx_mut().locals.push(Local { name, depth: None });
    }

    fn mark_initialized(&mut self) {
        let ctx = self.ctx_mut();
        if ctx.scope_depth == 0 {
            return;
        }
        let depth = ctx.scope_depth;
        if let Some(local) = ctx.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.ctx().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op(OpCode::DefineGlobal);
        self.emit_byte(global);
    }

    /// Find `name` among the current function's locals, innermost first.
    fn resolve_local(&mut self, name: &str) -> Option<u8> {
        let mut uninitialized = false;
        let mut slot = None;
        for (i, local) in self.ctx().locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth.is_none() {
                    uninitialized = true;
                }
                slot = Some(i as u8);
                break;
            }
        }
        if uninitialized {
            self.error("Cannot read local variable in its own initializer.");
        }
        slot
    }

    /// Emit a load or, when allowed and an `=` follows, a store for `name`.
    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let (get_op, set_op, arg) = match self.resolve_local(name.lexeme) {
            Some(slot) => (OpCode::GetLocal, OpCode::SetLocal, slot),
            None => {
                let index = self.identifier_constant(name);
                (OpCode::GetGlobal, OpCode::SetGlobal, index)
            }
        };
        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_op(set_op);
        } else {
            self.emit_op(get_op);
        }
        self.emit_byte(arg);
    }

    // -----------------------------------------------------------------------
    // Expression driver
    // -----------------------------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    /// The Pratt core: one prefix action, then infix actions while the next
    /// operator binds at least as tightly as `precedence`.
    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = rule(self.parser.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= rule(self.parser.current.kind).precedence {
            self.advance();
            if let Some(infix) = rule(self.parser.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        // An `=` nobody consumed means the left-hand side was no place to
        // assign to, e.g. `a * b = c;`.
        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Cannot have more than 255 arguments.");
                }
                count += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count.min(255) as u8
    }
}

// ---------------------------------------------------------------------------
// Parse actions (entries in the rule table)
// ---------------------------------------------------------------------------

/// A number literal; the scanner guarantees the lexeme parses.
fn number(compiler: &mut Compiler, _can_assign: bool) {
    let value: f64 = compiler.parser.previous.lexeme.parse().unwrap_or(0.0);
    compiler.emit_constant(Value::Number(value));
}

/// A string literal, minus its surrounding quotes, interned.
fn string(compiler: &mut Compiler, _can_assign: bool) {
    let lexeme = compiler.parser.previous.lexeme;
    let interned = compiler.strings.intern(&lexeme[1..lexeme.len() - 1]);
    compiler.emit_constant(Value::Str(interned));
}

fn literal(compiler: &mut Compiler, _can_assign: bool) {
    match compiler.parser.previous.kind {
        TokenKind::False => compiler.emit_op(OpCode::False),
        TokenKind::Nil => compiler.emit_op(OpCode::Nil),
        TokenKind::True => compiler.emit_op(OpCode::True),
        _ => unreachable!(),
    }
}

fn variable(compiler: &mut Compiler, can_assign: bool) {
    let name = compiler.parser.previous;
    compiler.named_variable(name, can_assign);
}

fn grouping(compiler: &mut Compiler, _can_assign: bool) {
    compiler.expression();
    compiler.consume(TokenKind::RightParen, "Expect ')' after expression.");
}

fn unary(compiler: &mut Compiler, _can_assign: bool) {
    let operator = compiler.parser.previous.kind;
    compiler.parse_precedence(Precedence::Unary);
    match operator {
        TokenKind::Minus => compiler.emit_op(OpCode::Negate),
        TokenKind::Bang => compiler.emit_op(OpCode::Not),
        _ => unreachable!(),
    }
}

/// Left operand is already on the stack; compile the right operand one level
/// higher so the operator is left-associative, then emit it. `!=`, `<=` and
/// `>=` compile to their complement followed by `Not`.
fn binary(compiler: &mut Compiler, _can_assign: bool) {
    let operator = compiler.parser.previous.kind;
    compiler.parse_precedence(rule(operator).precedence.next());
    match operator {
        TokenKind::BangEqual => {
            compiler.emit_op(OpCode::Equal);
            compiler.emit_op(OpCode::Not);
        }
        TokenKind::EqualEqual => compiler.emit_op(OpCode::Equal),
        TokenKind::Greater => compiler.emit_op(OpCode::Greater),
        TokenKind::GreaterEqual => {
            compiler.emit_op(OpCode::Less);
            compiler.emit_op(OpCode::Not);
        }
        TokenKind::Less => compiler.emit_op(OpCode::Less),
        TokenKind::LessEqual => {
            compiler.emit_op(OpCode::Greater);
            compiler.emit_op(OpCode::Not);
        }
        TokenKind::Plus => compiler.emit_op(OpCode::Add),
        TokenKind::Minus => compiler.emit_op(OpCode::Subtract),
        TokenKind::Star => compiler.emit_op(OpCode::Multiply),
        TokenKind::Slash => compiler.emit_op(OpCode::Divide),
        _ => unreachable!(),
    }
}

/// `and` short-circuits by jumping over the right operand when the left is
/// falsey, leaving the deciding value on the stack.
fn and_operator(compiler: &mut Compiler, _can_assign: bool) {
    let end_jump = compiler.emit_jump(OpCode::JumpIfFalse);
    compiler.emit_op(OpCode::Pop);
    compiler.parse_precedence(Precedence::And);
    compiler.patch_jump(end_jump);
}

fn or_operator(compiler: &mut Compiler, _can_assign: bool) {
    let else_jump = compiler.emit_jump(OpCode::JumpIfFalse);
    let end_jump = compiler.emit_jump(OpCode::Jump);
    compiler.patch_jump(else_jump);
    compiler.emit_op(OpCode::Pop);
    compiler.parse_precedence(Precedence::Or);
    compiler.patch_jump(end_jump);
}

fn call(compiler: &mut Compiler, _can_assign: bool) {
    let arg_count = compiler.argument_list();
    compiler.emit_op(OpCode::Call);
    compiler.emit_byte(arg_count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::OpCode::*;

    fn compile_ok(source: &str) -> Rc<Function> {
        let mut strings = Interner::new();
        compile(source, &mut strings).expect("source should compile")
    }

    fn compile_err(source: &str) -> Vec<String> {
        let mut strings = Interner::new();
        match compile(source, &mut strings) {
            Err(Error::Compile(errors)) => errors,
            other => panic!("expected a compile error, got {other:?}"),
        }
    }

    fn ops(chunk: &Chunk) -> Vec<OpCode> {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < chunk.code.len() {
            let op = OpCode::from_byte(chunk.code[offset]).expect("valid opcode");
            out.push(op);
            offset += 1 + op.operand_len();
        }
        out
    }

    #[test]
    fn arithmetic_respects_precedence() {
        let function = compile_ok("print 1 + 2 * 3;");
        assert_eq!(
            ops(&function.chunk),
            vec![Constant, Constant, Constant, Multiply, Add, Print, Nil, Return]
        );
    }

    #[test]
    fn comparison_complements_compile_to_not() {
        let function = compile_ok("1 <= 2;");
        assert_eq!(
            ops(&function.chunk),
            vec![Constant, Constant, Greater, Not, Pop, Nil, Return]
        );
    }

    #[test]
    fn locals_compile_to_slots_not_names() {
        let function = compile_ok("{ var a = 1; print a; }");
        assert_eq!(
            ops(&function.chunk),
            vec![Constant, GetLocal, Print, Pop, Nil, Return]
        );
        // Only the number literal reaches the constant pool.
        assert_eq!(function.chunk.constants.len(), 1);
    }

    #[test]
    fn end_scope_pops_every_local() {
        let function = compile_ok("{ var a = 1; var b = 2; }");
        assert_eq!(
            ops(&function.chunk),
            vec![Constant, Constant, Pop, Pop, Nil, Return]
        );
    }

    #[test]
    fn chunk_and_lines_stay_in_lockstep() {
        let function = compile_ok("var a = 1;\nvar b = a + 2;\nprint a == b;\n");
        assert_eq!(function.chunk.code.len(), function.chunk.lines.len());
    }

    #[test]
    fn function_declaration_emits_call() {
        let function = compile_ok("fun add(a, b) { return a + b; } print add(1, 2);");
        let script_ops = ops(&function.chunk);
        assert!(script_ops.contains(&Call));
        let inner = function
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Value::Function(f) => Some(Rc::clone(f)),
                _ => None,
            })
            .expect("inner function in constant pool");
        assert_eq!(inner.arity, 2);
        assert_eq!(
            ops(&inner.chunk),
            vec![GetLocal, GetLocal, Add, Return, Nil, Return]
        );
    }

    #[test]
    fn missing_expression_is_reported() {
        let errors = compile_err("print ;");
        assert_eq!(errors, vec!["[line 1] Error at ';': Expect expression."]);
    }

    #[test]
    fn invalid_assignment_target() {
        let errors = compile_err("var a = 1; var b = 2; a * b = 5;");
        assert_eq!(
            errors,
            vec!["[line 1] Error at '=': Invalid assignment target."]
        );
    }

    #[test]
    fn reading_a_local_in_its_own_initializer() {
        let errors = compile_err("var a = \"outer\"; { var a = a; }");
        assert_eq!(
            errors,
            vec!["[line 1] Error at 'a': Cannot read local variable in its own initializer."]
        );
    }

    #[test]
    fn redeclaration_in_same_scope() {
        let errors = compile_err("{ var a = 1; var a = 2; }");
        assert_eq!(
            errors,
            vec!["[line 1] Error at 'a': Already a variable with this name in this scope."]
        );
    }

    #[test]
    fn return_outside_a_function() {
        let errors = compile_err("return 1;");
        assert_eq!(
            errors,
            vec!["[line 1] Error at 'return': Cannot return from top-level code."]
        );
    }

    #[test]
    fn panic_mode_reports_one_error_per_statement() {
        let errors = compile_err("print ;\nprint ;\n");
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("[line 1]"));
        assert!(errors[1].starts_with("[line 2]"));
    }

    #[test]
    fn constant_pool_overflows_at_257() {
        // 256 distinct literals fit; one more does not.
        let mut source = String::new();
        for i in 0..256 {
            source.push_str(&format!("print {i};"));
        }
        compile_ok(&source);

        source.push_str("print 256;");
        let errors = compile_err(&source);
        assert!(errors[0].contains("Too many constants in one chunk."));
    }

    #[test]
    fn locals_overflow_at_257() {
        // Slot 0 is reserved, so 255 declarations reach 256 live locals.
        let mut source = String::from("{");
        for i in 0..255 {
            source.push_str(&format!("var l{i} = 0;"));
        }
        let ok = format!("{source}}}");
        compile_ok(&ok);

        let overflowing = format!("{source}var l255 = 0;}}");
        let errors = compile_err(&overflowing);
        assert!(errors[0].contains("Too many local variables in function."));
    }
}
