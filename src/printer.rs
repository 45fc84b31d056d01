use crate::constraints::{FractionConstraint, FractionConstraints};
use crate::context::{Context, ContextX};
use crate::def::PREFIX_ANON_DIMENSION;
use crate::fraction::{Fraction, FractionTerm};
use crate::permission::FractionalPermission;
use crate::permissions::FractionalPermissions;
use crate::state_space::StateSpace;
use crate::tuple::PermissionTuple;
use crate::util::vec_map;
use sise::{Node, Writer};

pub fn str_to_node(s: &str) -> Node {
    Node::Atom(s.to_string())
}

pub fn macro_push_node(nodes: &mut Vec<Node>, node: Node) {
    // turn a - b into a-b
    let len = nodes.len();
    if len != 0 {
        if let Node::Atom(cur) = &node {
            if let Node::Atom(prev) = &nodes[len - 1] {
                if node == "-" || (prev != "-" && prev.ends_with("-")) {
                    nodes[len - 1] = Node::Atom(prev.to_owned() + cur);
                    return;
                }
            }
        }
    }
    nodes.push(node);
}

/*
examples:
  node!(alive)
  node!((space Connection (dimension alive d (open closed))))
  node!((full open (states closed) frame))
  let x = node!((open closed));
  node!((dimension alive d {x}))
Atoms containing hyphens work inside a list, e.g. (pack-failed ...).
*/
#[macro_export]
macro_rules! node {
    ( - ) => { Node::Atom("-".to_string()) };
    ( { $x:expr } ) => { $x };
    ( [ $x:expr ] ) => { $x.clone() };
    ( $x:literal ) => { Node::Atom($x.to_string()) };
    ( ( $( $x:tt )* ) ) => {
        {
            #[allow(unused_mut)]
            let mut v = Vec::new();
            $(macro_push_node(&mut v, node!($x));)*
            Node::List(v)
        }
    };
    ( $x:tt ) => { Node::Atom(stringify!($x).to_string()) };
}
#[macro_export]
macro_rules! nodes {
   ( $( $x:tt )* ) => {
       {
           let mut v = Vec::new();
           $(macro_push_node(&mut v, node!($x));)*
           Node::List(v)
       }
   };
}
#[macro_export]
macro_rules! nodes_vec {
   ( $( $x:tt )* ) => {
       {
           let mut v = Vec::new();
           $(macro_push_node(&mut v, node!($x));)*
           v
       }
   };
}

pub fn fraction_to_node(f: Fraction) -> Node {
    Node::Atom(f.to_string())
}

pub fn term_to_node(t: &FractionTerm) -> Node {
    match t {
        FractionTerm::Frac(f) => fraction_to_node(*f),
        FractionTerm::Sum(fs) => {
            let mut nodes = vec![str_to_node("+")];
            nodes.extend(fs.iter().map(|f| fraction_to_node(*f)));
            Node::List(nodes)
        }
    }
}

pub fn constraint_to_node(c: &FractionConstraint) -> Node {
    match c {
        FractionConstraint::Eq(ts) => {
            let mut nodes = vec![str_to_node("=")];
            nodes.extend(ts.iter().map(term_to_node));
            Node::List(nodes)
        }
        FractionConstraint::Le(a, b) => nodes!(<= {term_to_node(a)} {term_to_node(b)}),
        FractionConstraint::Lt(a, b) => nodes!(< {term_to_node(a)} {term_to_node(b)}),
        FractionConstraint::NonZero(a) => nodes!(> {term_to_node(a)} 0),
    }
}

pub fn constraints_to_node(cs: &FractionConstraints) -> Node {
    let mut nodes = vec![str_to_node("constraints")];
    if let Some(reason) = cs.impossible_reason() {
        nodes.push(nodes!(impossible {Node::Atom(format!("\"{}\"", reason))}));
    }
    nodes.extend(cs.iter().map(constraint_to_node));
    Node::List(nodes)
}

pub fn permission_to_node(p: &FractionalPermission) -> Node {
    let mut fractions = vec_map(p.fractions().values(), |(n, f)| {
        Node::List(vec![str_to_node(n), fraction_to_node(*f)])
    });
    fractions.push(nodes!(below {fraction_to_node(p.fractions().below())}));
    let mut nodes = vec![str_to_node("perm"), str_to_node(p.root()), Node::List(fractions)];
    if p.is_read_only() {
        nodes.push(str_to_node("read-only"));
    }
    if p.is_frame() {
        nodes.push(str_to_node("frame"));
    }
    if !p.state_info().is_empty() {
        let mut states = vec![str_to_node("states")];
        states.extend(p.state_info().iter().map(|s| str_to_node(s)));
        nodes.push(Node::List(states));
    }
    Node::List(nodes)
}

pub fn permissions_to_node(perms: &FractionalPermissions) -> Node {
    if perms.is_bottom() {
        return str_to_node("bottom");
    }
    let list = |head: &str, ps: &[FractionalPermission]| {
        let mut nodes = vec![str_to_node(head)];
        nodes.extend(ps.iter().map(permission_to_node));
        Node::List(nodes)
    };
    let mut nodes = vec![
        str_to_node("permissions"),
        list("virtual", perms.virtuals()),
        list("frame", perms.frames()),
    ];
    if let Some(u) = perms.unpacked_permission() {
        nodes.push(nodes!(unpacked {permission_to_node(u)}));
    }
    nodes.push(constraints_to_node(&perms.constraints()));
    Node::List(nodes)
}

pub fn tuple_to_node(tuple: &PermissionTuple) -> Node {
    let mut nodes = vec![str_to_node("tuple")];
    for (loc, perms) in tuple.iter() {
        let mut entry = vec![str_to_node(&loc.to_string())];
        if tuple.receiver() == Some(*loc) {
            entry.push(str_to_node("this"));
        }
        entry.push(permissions_to_node(perms));
        nodes.push(Node::List(entry));
    }
    Node::List(nodes)
}

pub fn context_to_node(context: &Context) -> Node {
    match &**context {
        ContextX::True(ids) => nodes!(true {str_to_node(&ids.to_string())}),
        ContextX::FailedPack(failed, ids) => {
            let inv = Node::Atom(format!("\"{}\"", failed.invariant));
            node!((failed-pack {str_to_node(&ids.to_string())} {str_to_node(&failed.state)} {inv}))
        }
        ContextX::False(ids) => nodes!(false {str_to_node(&ids.to_string())}),
        ContextX::Tensor(t, ids) => nodes!(tensor {str_to_node(&ids.to_string())} {tuple_to_node(t)}),
        ContextX::Choice(es) => {
            let mut nodes = vec![str_to_node("choice")];
            nodes.extend(es.iter().map(context_to_node));
            Node::List(nodes)
        }
        ContextX::All(es) => {
            let mut nodes = vec![str_to_node("all")];
            nodes.extend(es.iter().map(context_to_node));
            Node::List(nodes)
        }
    }
}

/// Same format as print_parse::node_to_state_space reads
pub fn state_space_to_node(space: &StateSpace) -> Node {
    let mut nodes = vec![str_to_node("space"), str_to_node(&space.name)];
    for n in space.all_nodes() {
        if !space.is_dimension(n) {
            continue;
        }
        let states = Node::List(vec_map(&space.children(n), |s| str_to_node(s)));
        let marker = space.children(n).iter().any(|s| space.is_marker(s));
        let head = if marker { "marker" } else { "dimension" };
        let parent = space.parent(n).map_or_else(|| str_to_node("alive"), |p| str_to_node(&p));
        let name = if n.starts_with(PREFIX_ANON_DIMENSION) { str_to_node("_") } else { str_to_node(n) };
        nodes.push(Node::List(vec![str_to_node(head), parent, name, states]));
    }
    for (f, n) in space.fields() {
        nodes.push(nodes!(field {str_to_node(&f)} {str_to_node(&n)}));
    }
    Node::List(nodes)
}

pub struct NodeWriter {}

impl NodeWriter {
    pub(crate) fn new() -> Self {
        NodeWriter {}
    }

    pub(crate) fn write_node(
        &mut self,
        writer: &mut sise::SpacedStringWriter,
        node: &Node,
        break_len: usize,
        brk: bool,
    ) {
        let opts =
            sise::SpacedStringWriterNodeOptions { break_line_len: if brk { 0 } else { break_len } };
        match node {
            Node::Atom(a) => {
                writer.write_atom(a, opts).unwrap();
            }
            Node::List(l) => {
                writer.begin_list(opts).unwrap();
                let mut brk = false;
                for n in l {
                    self.write_node(writer, n, break_len + 1, brk);
                    match n {
                        // one element per line after these heads
                        Node::Atom(a)
                            if a == "choice"
                                || a == "all"
                                || a == "tuple"
                                || a == "permissions"
                                || a == "constraints" =>
                        {
                            brk = true;
                        }
                        _ => {}
                    }
                }
                writer.end_list(()).unwrap();
            }
        }
    }

    pub(crate) fn node_to_string_indent(&mut self, indent: &String, node: &Node) -> String {
        let indentation = " ";
        let style = sise::SpacedStringWriterStyle {
            line_break: &("\n".to_string() + &indent),
            indentation,
        };
        let mut result = String::new();
        let mut string_writer = sise::SpacedStringWriter::new(style, &mut result);
        self.write_node(&mut string_writer, &node, 80, false);
        string_writer.finish(()).unwrap();
        // Consolidate closing ) lines:
        let lines: Vec<&str> = result.lines().collect();
        let mut result: String = "".to_string();
        let mut i = 0;
        while i < lines.len() {
            let mut line = lines[i].to_owned();
            if line.trim() == ")" {
                while i + 1 < lines.len() && lines[i + 1].trim() == ")" {
                    line = lines[i + 1].to_string() + &indentation[1..] + line.trim();
                    i += 1;
                }
            }
            result.push_str(&line);
            i += 1;
            if i < lines.len() {
                result.push_str("\n");
            }
        }
        result
    }
}

pub(crate) fn node_to_string_indent(indent: &String, node: &Node) -> String {
    NodeWriter::new().node_to_string_indent(indent, node)
}

pub fn node_to_string(node: &Node) -> String {
    NodeWriter::new().node_to_string_indent(&"".to_string(), node)
}
