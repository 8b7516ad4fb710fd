//! Block-structured page templating.
//!
//! The markup dialect is the original `{{ ... }}` directive set:
//! mutually exclusive `if error` / `if no error` sections, a single
//! `loop` section expanded once per listing row, per-row `if file` /
//! `if not file` conditionals, and `$NAME` placeholder substitution.
//!
//! The document is parsed once at construction into a block tree and
//! evaluated by tree walking. Matching is non-greedy: an open
//! directive pairs with the first close directive of its kind, and
//! blocks of the same kind do not nest. Malformed or unbalanced
//! directives pass through as literal text; parsing never fails.

/// Ordered variable mapping for substitution.
///
/// Lookups that miss leave the placeholder verbatim in the output, so
/// an incomplete context can never fail a render.
#[derive(Debug, Clone, Default)]
pub struct Context {
    vars: Vec<(String, String)>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable, replacing any earlier value of the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.vars.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.vars.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// What kind of listing row is being expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    /// The synthetic ".." entry
    Parent,
    Dir,
    File,
}

/// One expanded loop iteration: the row kind plus its variables.
#[derive(Debug, Clone)]
pub struct Row {
    pub kind: RowKind,
    pub vars: Context,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Error,
    NoError,
    Loop,
    File,
    NotFile,
}

impl BlockKind {
    fn open(token: &str) -> Option<Self> {
        match token {
            "if error" => Some(BlockKind::Error),
            "if no error" => Some(BlockKind::NoError),
            "loop" => Some(BlockKind::Loop),
            "if file" => Some(BlockKind::File),
            "if not file" => Some(BlockKind::NotFile),
            _ => None,
        }
    }

    fn close_token(self) -> &'static str {
        match self {
            BlockKind::Error | BlockKind::NoError => "endif",
            BlockKind::Loop => "endloop",
            BlockKind::File => "endif file",
            BlockKind::NotFile => "endif not file",
        }
    }
}

#[derive(Debug)]
enum Node {
    Text(String),
    Block(BlockKind, Vec<Node>),
}

/// A raw directive occurrence: byte range plus normalized token.
struct Directive {
    start: usize,
    end: usize,
    token: String,
}

fn next_directive(input: &str, from: usize) -> Option<Directive> {
    let rel = input[from..].find("{{")?;
    let start = from + rel;
    let close = input[start + 2..].find("}}")?;
    let inner = &input[start + 2..start + 2 + close];
    let token = inner.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(Directive {
        start,
        end: start + 2 + close + 2,
        token,
    })
}

/// Find the first close directive for `kind` at or after `from`.
fn find_close(input: &str, kind: BlockKind, mut from: usize) -> Option<Directive> {
    let wanted = kind.close_token();
    while let Some(directive) = next_directive(input, from) {
        if directive.token == wanted {
            return Some(directive);
        }
        from = directive.end;
    }
    None
}

fn parse_nodes(input: &str) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut pos = 0;
    while pos < input.len() {
        let Some(directive) = next_directive(input, pos) else {
            nodes.push(Node::Text(input[pos..].to_string()));
            break;
        };
        if directive.start > pos {
            nodes.push(Node::Text(input[pos..directive.start].to_string()));
        }
        match BlockKind::open(&directive.token) {
            Some(kind) => match find_close(input, kind, directive.end) {
                Some(close) => {
                    let body = &input[directive.end..close.start];
                    nodes.push(Node::Block(kind, parse_nodes(body)));
                    pos = close.end;
                }
                None => {
                    // unbalanced open: keep the directive text as-is
                    nodes.push(Node::Text(input[directive.start..directive.end].to_string()));
                    pos = directive.end;
                }
            },
            None => {
                // stray close or unknown directive: literal pass-through
                nodes.push(Node::Text(input[directive.start..directive.end].to_string()));
                pos = directive.end;
            }
        }
    }
    nodes
}

/// Substitute `$NAME`, `${NAME}` and `$$` using the context.
///
/// Names the context does not know stay in the output untouched.
pub fn substitute(text: &str, ctx: &Context) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while pos < bytes.len() {
        if bytes[pos] != b'$' {
            let next = text[pos..].find('$').map_or(text.len(), |i| pos + i);
            out.push_str(&text[pos..next]);
            pos = next;
            continue;
        }
        // escaped dollar
        if bytes.get(pos + 1) == Some(&b'$') {
            out.push('$');
            pos += 2;
            continue;
        }
        // braced form
        if bytes.get(pos + 1) == Some(&b'{') {
            if let Some(rel) = text[pos + 2..].find('}') {
                let name = &text[pos + 2..pos + 2 + rel];
                if is_identifier(name) {
                    if let Some(value) = ctx.get(name) {
                        out.push_str(value);
                    } else {
                        out.push_str(&text[pos..pos + 2 + rel + 1]);
                    }
                    pos += 2 + rel + 1;
                    continue;
                }
            }
            out.push('$');
            pos += 1;
            continue;
        }
        // bare identifier form
        let name_len = text[pos + 1..]
            .char_indices()
            .take_while(|(i, c)| is_identifier_char(*c, *i == 0))
            .count();
        if name_len == 0 {
            out.push('$');
            pos += 1;
            continue;
        }
        let name = &text[pos + 1..pos + 1 + name_len];
        if let Some(value) = ctx.get(name) {
            out.push_str(value);
        } else {
            out.push_str(&text[pos..pos + 1 + name_len]);
        }
        pos += 1 + name_len;
    }
    out
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .enumerate()
            .all(|(i, c)| is_identifier_char(c, i == 0))
}

fn is_identifier_char(c: char, first: bool) -> bool {
    c == '_' || c.is_ascii_alphabetic() || (!first && c.is_ascii_digit())
}

/// A parsed template, immutable and shareable across requests.
#[derive(Debug)]
pub struct TemplateDocument {
    nodes: Vec<Node>,
}

impl TemplateDocument {
    pub fn parse(markup: &str) -> Self {
        Self {
            nodes: parse_nodes(markup),
        }
    }

    /// Render the error variant: `if error` blocks are kept, the
    /// `if no error` section is deleted entirely. The page context
    /// normally carries `ERROR_MESSAGE`.
    pub fn render_error(&self, page: &Context) -> String {
        let mut out = String::new();
        render_nodes(&self.nodes, None, None, &mut out);
        substitute(&out, page)
    }

    /// Render the listing variant: the `if no error` section is kept
    /// and its `loop` body expands once per row, in the order given.
    pub fn render_listing(&self, page: &Context, rows: &[Row]) -> String {
        let mut out = String::new();
        render_nodes(&self.nodes, Some(rows), None, &mut out);
        substitute(&out, page)
    }
}

fn render_nodes(nodes: &[Node], rows: Option<&[Row]>, row: Option<&Row>, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Block(BlockKind::Error, children) => {
                if rows.is_none() {
                    render_nodes(children, rows, row, out);
                }
            }
            Node::Block(BlockKind::NoError, children) => {
                if rows.is_some() {
                    render_nodes(children, rows, row, out);
                }
            }
            Node::Block(BlockKind::Loop, children) => {
                let Some(rows) = rows else { continue };
                for current in rows {
                    let mut body = String::new();
                    render_nodes(children, Some(rows), Some(current), &mut body);
                    out.push_str(&substitute(&body, &current.vars));
                }
            }
            Node::Block(BlockKind::File, children) => {
                if matches!(row, Some(r) if r.kind == RowKind::File) {
                    render_nodes(children, rows, row, out);
                }
            }
            Node::Block(BlockKind::NotFile, children) => {
                if matches!(row, Some(r) if r.kind != RowKind::File) {
                    render_nodes(children, rows, row, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKUP: &str = "\
<title>$TITLE</title>
{{ if error }}error: $ERROR_MESSAGE{{ endif }}
{{ if no error }}<ul>
{{ loop }}<li class=\"{{ if file }}file{{ endif file }}{{ if not file }}dir{{ endif not file }}\">$NAME</li>
{{ endloop }}</ul>{{ endif }}";

    fn page() -> Context {
        let mut ctx = Context::new();
        ctx.set("TITLE", "listing");
        ctx
    }

    fn row(kind: RowKind, name: &str) -> Row {
        let mut vars = Context::new();
        vars.set("NAME", name);
        Row { kind, vars }
    }

    #[test]
    fn test_error_render_drops_listing_blocks() {
        let doc = TemplateDocument::parse(MARKUP);
        let mut ctx = page();
        ctx.set("ERROR_MESSAGE", "Invalid file or directory");
        let html = doc.render_error(&ctx);
        assert!(html.contains("error: Invalid file or directory"));
        assert!(!html.contains("<ul>"));
        assert!(!html.contains("<li"));
    }

    #[test]
    fn test_listing_render_drops_error_block() {
        let doc = TemplateDocument::parse(MARKUP);
        let rows = [row(RowKind::Dir, "docs"), row(RowKind::File, "readme.txt")];
        let html = doc.render_listing(&page(), &rows);
        assert!(!html.contains("error:"));
        assert!(html.contains("<li class=\"dir\">docs</li>"));
        assert!(html.contains("<li class=\"file\">readme.txt</li>"));
    }

    #[test]
    fn test_loop_expands_rows_in_order() {
        let doc = TemplateDocument::parse("{{ if no error }}{{ loop }}$NAME;{{ endloop }}{{ endif }}");
        let rows = [
            row(RowKind::Parent, ".."),
            row(RowKind::Dir, "docs"),
            row(RowKind::File, "readme.txt"),
        ];
        let html = doc.render_listing(&Context::new(), &rows);
        assert_eq!(html, "..;docs;readme.txt;");
    }

    #[test]
    fn test_parent_row_takes_not_file_branch() {
        let doc = TemplateDocument::parse(
            "{{ if no error }}{{ loop }}{{ if not file }}[$NAME]{{ endif not file }}{{ if file }}($NAME){{ endif file }}{{ endloop }}{{ endif }}",
        );
        let rows = [row(RowKind::Parent, ".."), row(RowKind::File, "a.txt")];
        let html = doc.render_listing(&Context::new(), &rows);
        assert_eq!(html, "[..](a.txt)");
    }

    #[test]
    fn test_unknown_placeholder_stays_verbatim() {
        let ctx = Context::new();
        assert_eq!(substitute("hello $WHO", &ctx), "hello $WHO");
        assert_eq!(substitute("hello ${WHO}", &ctx), "hello ${WHO}");
    }

    #[test]
    fn test_substitution_forms() {
        let mut ctx = Context::new();
        ctx.set("NAME", "value");
        assert_eq!(substitute("$NAME", &ctx), "value");
        assert_eq!(substitute("${NAME}", &ctx), "value");
        assert_eq!(substitute("$$NAME", &ctx), "$NAME");
        assert_eq!(substitute("100$ $", &ctx), "100$ $");
        assert_eq!(substitute("$NAME.txt", &ctx), "value.txt");
    }

    #[test]
    fn test_row_vars_do_not_leak_into_page_scope() {
        let doc = TemplateDocument::parse("{{ if no error }}{{ loop }}$NAME{{ endloop }}{{ endif }} $NAME");
        let rows = [row(RowKind::File, "a")];
        let html = doc.render_listing(&Context::new(), &rows);
        // the trailing $NAME sits outside the loop and has no page
        // value, so it must stay a literal placeholder
        assert_eq!(html, "a $NAME");
    }

    #[test]
    fn test_page_vars_substitute_inside_loop_body() {
        let doc = TemplateDocument::parse("{{ if no error }}{{ loop }}$NAME$SUFFIX {{ endloop }}{{ endif }}");
        let mut page = Context::new();
        page.set("SUFFIX", "!");
        let rows = [row(RowKind::File, "a"), row(RowKind::Dir, "b")];
        assert_eq!(doc.render_listing(&page, &rows), "a! b! ");
    }

    #[test]
    fn test_malformed_directives_pass_through() {
        let doc = TemplateDocument::parse("a {{ bogus }} b {{ endloop }} c {{ loop }} unclosed");
        let html = doc.render_listing(&Context::new(), &[]);
        assert_eq!(html, "a {{ bogus }} b {{ endloop }} c {{ loop }} unclosed");
    }

    #[test]
    fn test_directive_whitespace_is_normalized() {
        let doc = TemplateDocument::parse("{{   if    error }}E{{ endif }}{{ if no error }}L{{ endif }}");
        assert_eq!(doc.render_error(&Context::new()), "E");
        assert_eq!(doc.render_listing(&Context::new(), &[]), "L");
    }
}
