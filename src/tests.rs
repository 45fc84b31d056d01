use crate::analysis::{create_initial_constructor_context, create_initial_method_context, MethodEnv};
use crate::ast::{str_ident, Location, MergePoint, Span};
use crate::choice::ChoiceIds;
use crate::constraints::{ConstraintsBuilder, FractionConstraint, FractionConstraints};
use crate::context::{
    at_least_as_precise, check_tensors, compact, is_false_context, is_true_context, join, mk_all,
    mk_choice, mk_failed_pack, mk_false, mk_tensor, mk_true, Context, ContextX,
};
use crate::ctx::Ctx;
use crate::fraction::{Fraction, FractionSupply, FractionTerm};
use crate::messages::Message;
use crate::operations::{FieldAccess, Invocation};
use crate::permission::{PermissionKind, SplitRemainder};
use crate::permission_set::PermissionSetFromAnnotations;
use crate::permissions::FractionalPermissions;
#[allow(unused_imports)]
use crate::print_parse::{
    node_to_class_decl, node_to_permission_spec, node_to_predicate, node_to_state_space, parse_node,
};
#[allow(unused_imports)]
use crate::printer::{context_to_node, macro_push_node, node_to_string, state_space_to_node};
use crate::signature::{method_signature, ClassDecl, MethodCase, Predicate};
use crate::state_space::{StateSpace, StateSpaceRepository};
use crate::tuple::{wrangle_receiver_into_states, FailedPack, PermissionTuple, TupleBuilder};
#[allow(unused_imports)]
use sise::Node;
use std::sync::{Arc, Mutex};

#[allow(unused_macros)]
macro_rules! space {
    ( $( $x:tt )* ) => {
        match node_to_state_space(&nodes!(space $($x)*)) {
            Ok(space) => space,
            Err(s) => panic!("{}", s),
        }
    };
}

#[allow(unused_macros)]
macro_rules! perm {
    ( $( $x:tt )* ) => {
        match node_to_permission_spec(&nodes!($($x)*)) {
            Ok(spec) => spec,
            Err(s) => panic!("{}", s),
        }
    };
}

fn span() -> Span {
    Span { id: 0, as_string: "test".to_string() }
}

fn socket() -> StateSpace {
    space!(Socket (dimension alive s (connected disconnected)))
}

fn connection() -> StateSpace {
    space!(Connection (dimension alive d (open closed)) (field sock open))
}

fn repo() -> Arc<StateSpaceRepository> {
    let repo = StateSpaceRepository::new();
    repo.register(socket());
    repo.register(connection());
    Arc::new(repo)
}

fn parse<A, F: Fn(&Node) -> Result<A, String>>(s: &str, f: F) -> A {
    match parse_node(s).and_then(|n| f(&n)) {
        Ok(a) => a,
        Err(e) => panic!("{}", e),
    }
}

fn pred(repo: &StateSpaceRepository, s: &str) -> Predicate {
    parse(s, |n| node_to_predicate(n, repo))
}

fn connection_class(repo: &StateSpaceRepository) -> ClassDecl {
    parse(
        "(class Connection
            (inv open (pred (sock Socket full alive (states connected))))
            (inv closed (pred (sock Socket full alive (states disconnected)))))",
        |n| node_to_class_decl(n, repo),
    )
}

fn entry(space: &StateSpace, spec: &crate::permission::PermissionSpec, supply: &FractionSupply) -> FractionalPermissions {
    let set = PermissionSetFromAnnotations::singleton(space, spec, true, supply);
    FractionalPermissions::empty().merge_in(&set, supply)
}

/// Receiver l0 holding a frame permission in open, field sock at l1
fn packed_connection(ctx: &Ctx) -> PermissionTuple {
    let mut b = TupleBuilder::new();
    b.set_receiver(Location(0));
    b.map_field(&str_ident("sock"), Location(1));
    b.set(Location(0), entry(&connection(), &perm!(full alive (states open) frame), &ctx.supply));
    b.build()
}

fn tensor(t: PermissionTuple) -> Context {
    mk_tensor(t, ChoiceIds::root())
}

struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn solver_sum_zero_propagates() {
    let (v0, v1, v2) = (Fraction::Variable(0), Fraction::Variable(1), Fraction::Variable(2));
    let mut cs = ConstraintsBuilder::new();
    cs.add_eq(v0, FractionTerm::sum(&[v1, v2]));
    cs.add_zero(v0);
    let a = cs.solve();
    assert!(a.is_consistent());
    assert!(a.is_zero(&v1.into()));
    assert!(a.is_zero(&v2.into()));
    cs.add_non_zero(v1);
    assert!(!cs.is_consistent());
}

#[test]
fn solver_one_summand_zeroes_others() {
    let (v0, v1) = (Fraction::Variable(0), Fraction::Variable(1));
    let mut cs = ConstraintsBuilder::new();
    cs.add_eq(Fraction::One, FractionTerm::sum(&[Fraction::One, v0, v1]));
    let a = cs.solve();
    assert!(a.is_consistent());
    assert!(a.is_zero(&v0.into()));
    assert!(a.is_zero(&v1.into()));
}

#[test]
fn solver_distinct_literals_conflict() {
    let mut cs = ConstraintsBuilder::new();
    cs.add_eq(Fraction::Named(0), Fraction::Named(1));
    assert!(!cs.is_consistent());
    let mut cs = ConstraintsBuilder::new();
    cs.add_lt(Fraction::One, Fraction::Variable(3));
    assert!(!cs.is_consistent());
    let mut cs = ConstraintsBuilder::new();
    cs.add_le(Fraction::Variable(0), Fraction::Variable(1));
    cs.add_non_zero(Fraction::Variable(0));
    let a = cs.solve();
    assert!(a.is_consistent());
    assert!(a.is_non_zero(&Fraction::Variable(1).into()));
}

#[test]
fn impossible_constraints_keep_first_reason() {
    let mut cs = ConstraintsBuilder::new();
    cs.add_impossible("first");
    cs.add_impossible("second");
    let cs = cs.build();
    assert!(cs.is_unsatisfiable());
    assert_eq!(cs.impossible_reason().map(|r| r.as_str()), Some("first"));
    // unsatisfiable constraints imply anything
    assert!(cs.at_least_as_precise(&FractionConstraints::empty()));
    assert!(!FractionConstraints::empty().at_least_as_precise(&cs));
}

#[test]
fn state_space_queries() {
    let s = space!(Two (dimension alive a (x y)) (dimension alive b (p q)) (dimension x _ (x1 x2)));
    let n = |s: &str| str_ident(s);
    assert!(s.first_bigger_than_second(&n("alive"), &n("x1")));
    assert!(s.first_bigger_than_second(&n("x"), &n("x")));
    assert!(!s.first_bigger_than_second(&n("x1"), &n("x")));
    assert!(s.are_orthogonal(&n("x"), &n("p")));
    assert!(s.are_orthogonal(&n("x1"), &n("q")));
    assert!(!s.are_orthogonal(&n("x"), &n("y")));
    assert!(!s.are_orthogonal(&n("x"), &n("x1")));
    assert_eq!(s.lowest_common_parent(&n("x"), &n("y")), n("alive"));
    assert_eq!(s.lowest_common_parent(&n("x1"), &n("x2")), n("x"));
    assert!(s.first_implies_second(&n("x1"), &n("a")));
    // unknown states hang off alive
    assert_eq!(s.parent(&n("nowhere")), Some(n("alive")));
    assert!(!s.are_orthogonal(&n("nowhere"), &n("x")));
}

#[test]
fn state_space_errors() {
    let mut b = crate::state_space::StateSpaceBuilder::new("Bad");
    assert!(b.add_dimension(Some("d"), "alive", &["s", "t"], false).is_ok());
    assert!(b.add_dimension(Some("e"), "unknown", &["u"], false).is_err());
    assert!(b.add_dimension(Some("f"), "d", &["u"], false).is_err());
    assert!(b.add_dimension(Some("g"), "s", &["t"], false).is_err());
    assert!(b.map_field("f", "missing").is_err());
}

#[test]
fn state_space_prints_and_parses() {
    let s = space!(Two (dimension alive a (x y)) (marker alive b (p q)) (field f x));
    let printed = node_to_string(&state_space_to_node(&s));
    let reparsed = parse(&printed, node_to_state_space);
    assert_eq!(node_to_string(&state_space_to_node(&reparsed)), printed);
    assert!(reparsed.is_marker(&str_ident("p")));
    assert_eq!(reparsed.field_root_node(&str_ident("f")), Some(str_ident("x")));
}

#[test]
fn split_remainder_table() {
    use PermissionKind::*;
    assert_eq!(Unique.remainder_when_split(Unique), SplitRemainder::Nothing);
    assert_eq!(Full.remainder_when_split(Full), SplitRemainder::Kind(Pure));
    assert_eq!(Full.remainder_when_split(Pure), SplitRemainder::Kind(Full));
    assert_eq!(Share.remainder_when_split(Immutable), SplitRemainder::Impossible);
    assert_eq!(Immutable.remainder_when_split(Pure), SplitRemainder::Kind(Immutable));
    assert_eq!(Pure.remainder_when_split(Share), SplitRemainder::Impossible);
}

#[test]
fn split_merge_round_trip() {
    let supply = FractionSupply::new();
    let space = socket();
    let original = entry(&space, &perm!(full alive (states connected)), &supply);
    let request = PermissionSetFromAnnotations::singleton(&space, &perm!(full alive), false, &supply);
    let split = original.split_off(&request, &supply);
    assert!(!split.is_unsatisfiable());
    assert_eq!(split.virtuals()[0].kind(split.constraints().assignment()), PermissionKind::Pure);
    let merged = split.merge_in(&request, &supply);
    assert!(merged.constraints().is_consistent());
    assert!(merged.at_least_as_precise(&original));
}

#[test]
fn split_unavailable_kind_is_impossible() {
    let supply = FractionSupply::new();
    let space = socket();
    let share = entry(&space, &perm!(share alive), &supply);
    let request = PermissionSetFromAnnotations::singleton(&space, &perm!(immutable alive), false, &supply);
    let split = share.split_off(&request, &supply);
    assert!(split.is_impossible());
    // nothing for the root at all
    let empty = FractionalPermissions::empty().split_off(&request, &supply);
    assert!(empty.impossible_reason().map_or(false, |r| r.starts_with("No permission available")));
    // bottom trivially succeeds
    assert!(FractionalPermissions::bottom().split_off(&request, &supply).is_bottom());
    assert!(FractionalPermissions::bottom().merge_in(&request, &supply).is_bottom());
}

#[test]
fn pure_request_tolerates_smaller_root() {
    let supply = FractionSupply::new();
    let space = connection();
    let open = entry(&space, &perm!(full open), &supply);
    let request = PermissionSetFromAnnotations::singleton(&space, &perm!(pure alive), false, &supply);
    assert!(!open.split_off(&request, &supply).is_unsatisfiable());
    let request = PermissionSetFromAnnotations::singleton(&space, &perm!(full alive), false, &supply);
    assert!(open.split_off(&request, &supply).is_unsatisfiable());
}

#[test]
fn move_down_keeps_orthogonal_rest() {
    let supply = FractionSupply::new();
    let space = space!(Two (dimension alive a (x y)) (dimension alive b (p q)));
    let perms = entry(&space, &perm!(full alive), &supply);
    let request = PermissionSetFromAnnotations::singleton(&space, &perm!(full x), false, &supply);
    let split = perms.split_off(&request, &supply);
    assert!(!split.is_unsatisfiable());
    let roots: Vec<String> = split.virtuals().iter().map(|p| p.root().to_string()).collect();
    assert!(roots.contains(&"b".to_string()));
}

#[test]
fn orthogonal_roots_combine() {
    let supply = FractionSupply::new();
    let space = space!(Two (dimension alive a (x y)) (dimension alive b (p q)));
    let set = |spec| PermissionSetFromAnnotations::singleton(&space, &spec, false, &supply);
    let x = set(perm!(full x));
    assert!(x.combine(&set(perm!(full y))).is_err());
    assert!(x.combine(&set(perm!(share p))).is_ok());
    assert!(set(perm!(full a)).combine(&set(perm!(full b))).is_ok());
    assert!(x.combine(&set(perm!(full alive))).is_err());
    // frame and virtual permissions live in separate lists
    assert!(x.combine(&set(perm!(full y frame))).is_ok());
}

#[test]
fn precision_is_transitive_on_state_info() {
    let supply = FractionSupply::new();
    let space = space!(Two (dimension alive a (x y)) (dimension alive b (p q)));
    let c = entry(&space, &perm!(full alive), &supply);
    let b = c.learn_temporary_state_info(&str_ident("x"), false);
    let a = b.learn_temporary_state_info(&str_ident("p"), false);
    assert!(a.at_least_as_precise(&a));
    assert!(a.at_least_as_precise(&b));
    assert!(b.at_least_as_precise(&c));
    assert!(a.at_least_as_precise(&c));
    assert!(!c.at_least_as_precise(&a));
    assert!(a.is_in_states(&[str_ident("x"), str_ident("p")], false));
    assert!(!a.is_in_state(&str_ident("y"), false));
    assert!(FractionalPermissions::bottom().at_least_as_precise(&a));
    assert!(!a.at_least_as_precise(&FractionalPermissions::bottom()));
}

#[test]
fn loop_join_keeps_only_older_constraints() {
    let supply = FractionSupply::new();
    let a = entry(&socket(), &perm!(full alive), &supply);
    let extra = FractionConstraint::NonZero(FractionTerm::Frac(Fraction::Variable(999)));
    let mut cs = a.constraints().to_builder();
    cs.add(extra.clone());
    let b = FractionalPermissions::from_parts(a.virtuals().to_vec(), Vec::new(), None, cs.build());
    // constraints on unrelated fractions do not change precision
    assert!(a.at_least_as_precise(&b));
    assert!(b.at_least_as_precise(&a));
    let joined = a.join(&b, MergePoint::Loop, &supply);
    assert!(!joined.constraints().contains(&extra));
    assert_eq!(joined.constraints(), a.constraints());
    let joined = b.join(&a, MergePoint::Loop, &supply);
    assert!(!joined.constraints().contains(&extra));
    let joined = a.join(&b, MergePoint::Branch, &supply);
    assert!(joined.constraints().contains(&extra));
}

#[test]
fn join_weakens_different_fractions() {
    let supply = FractionSupply::new();
    let space = socket();
    let full = entry(&space, &perm!(full alive (states connected)), &supply);
    let other = entry(&space, &perm!(full alive (states disconnected)), &supply);
    let joined = full.join(&other, MergePoint::Branch, &supply);
    assert!(joined.constraints().is_consistent());
    assert!(joined.virtuals()[0].state_info().is_empty());
    assert!(!joined.is_in_state(&str_ident("connected"), false));
}

#[test]
#[should_panic(expected = "internal error")]
fn double_unpack_panics() {
    let ctx = Ctx::new(repo());
    let perms = entry(&connection(), &perm!(full alive frame), &ctx.supply);
    let once = perms.unpack(&connection(), &str_ident("alive"), &ctx.supply);
    once.unpack(&connection(), &str_ident("alive"), &ctx.supply);
}

#[test]
fn unpack_without_frame_permission_is_impossible() {
    let ctx = Ctx::new(repo());
    let perms = entry(&connection(), &perm!(full alive), &ctx.supply);
    let unpacked = perms.unpack(&connection(), &str_ident("alive"), &ctx.supply);
    assert!(unpacked.is_unpacked());
    assert!(unpacked.impossible_reason().map_or(false, |r| r.contains("unpack to alive")));
}

#[test]
fn pack_to_other_state_fails_with_invariant() {
    let repo = repo();
    let ctx = Ctx::new(repo.clone());
    let class = connection_class(&repo);
    let mut b = packed_connection(&ctx).to_builder();
    b.unpack_receiver(&ctx, &class, &str_ident("alive"));
    let sock = b.get(Location(1));
    assert!(sock.is_in_state(&str_ident("connected"), false));

    let mut reopen = b.clone();
    assert_eq!(reopen.pack_receiver(&ctx, &class, &[str_ident("open")]), Ok(()));
    assert!(reopen.get(Location(0)).is_in_state(&str_ident("open"), true));

    let failed = match b.pack_receiver(&ctx, &class, &[str_ident("closed")]) {
        Ok(()) => panic!("packing to closed must fail"),
        Err(failed) => failed,
    };
    assert_eq!(failed.state, str_ident("closed"));
    assert!(failed.invariant.contains("disconnected"));
    // the failed pack left everything in place; give up on it explicitly
    assert!(b.get(Location(0)).is_unpacked());
    b.invalid_pack_receiver();
    let t = b.build();
    assert!(!t.get(Location(0)).is_unpacked());
    assert!(t.get(Location(0)).is_impossible());
    assert!(t.get(Location(1)).is_in_state(&str_ident("connected"), false));
}

#[test]
fn failed_pack_is_reported() {
    let repo = repo();
    let ctx = Ctx::new(repo.clone());
    let class = connection_class(&repo);
    let mut b = packed_connection(&ctx).to_builder();
    b.unpack_receiver(&ctx, &class, &str_ident("alive"));
    let c = wrangle_receiver_into_states(&ctx, &class, &b.build(), ChoiceIds::root(), &[str_ident("closed")], false);
    assert!(is_true_context(&c));
    let err = match check_tensors(&c, &mut |_, _| Ok(())) {
        Ok(()) => panic!("failed pack must be reported"),
        Err(err) => err,
    };
    assert!(err.note.starts_with("Previously attempted to pack to closed"));
}

#[test]
fn log_records_unpack() {
    let repo = repo();
    let mut ctx = Ctx::new(repo.clone());
    let buf = Arc::new(Mutex::new(Vec::new()));
    ctx.set_log(Some(Box::new(SharedBuf(buf.clone()))));
    let class = connection_class(&repo);
    let mut b = packed_connection(&ctx).to_builder();
    b.unpack_receiver(&ctx, &class, &str_ident("alive"));
    let _ = b.pack_receiver(&ctx, &class, &[str_ident("closed")]);
    let log = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
    assert!(log.contains("(unpack l0 alive)"));
    assert!(log.contains("(pack-failed closed"));
}

fn contexts(ctx: &Ctx) -> (Context, Context) {
    let perms = entry(&socket(), &perm!(full alive), &ctx.supply);
    let mut b = TupleBuilder::new();
    b.set(Location(2), perms.learn_temporary_state_info(&str_ident("connected"), false));
    let precise = b.build();
    let mut b = TupleBuilder::new();
    b.set(Location(2), perms);
    let vague = b.build();
    (tensor(precise), tensor(vague))
}

#[test]
fn freeze_is_idempotent() {
    let ctx = Ctx::new(repo());
    let (precise, vague) = contexts(&ctx);
    let x = mk_choice(vec![
        vague.clone(),
        mk_true(ChoiceIds::root()),
        mk_choice(vec![precise.clone(), vague.clone()]),
        mk_all(vec![vague.clone(), precise.clone()]),
    ]);
    let once = compact(&x, true);
    let twice = compact(&once, true);
    assert_eq!(once, twice);
    assert!(at_least_as_precise(&once, &x));
}

#[test]
fn choice_keeps_most_precise_all_keeps_least() {
    let ctx = Ctx::new(repo());
    let (precise, vague) = contexts(&ctx);
    assert!(at_least_as_precise(&precise, &vague));
    assert!(!at_least_as_precise(&vague, &precise));
    let c = compact(&mk_choice(vec![vague.clone(), precise.clone()]), true);
    assert_eq!(c, precise);
    let a = compact(&mk_all(vec![vague.clone(), precise.clone()]), true);
    assert_eq!(a, vague);
    // without freeze only duplicates go
    let c = compact(&mk_choice(vec![vague.clone(), precise.clone(), vague.clone()]), false);
    assert!(matches!(&*c, ContextX::Choice(es) if es.len() == 2));
}

#[test]
fn true_and_false_precision() {
    let ctx = Ctx::new(repo());
    let (precise, _) = contexts(&ctx);
    let t = mk_true(ChoiceIds::root());
    let f = mk_false(ChoiceIds::root());
    for x in [precise.clone(), t.clone(), f.clone(), mk_choice(vec![]), mk_all(vec![])].iter() {
        assert!(at_least_as_precise(x, x));
        assert!(at_least_as_precise(&f, x));
        assert!(at_least_as_precise(x, &f));
        assert!(at_least_as_precise(x, &t));
    }
    assert!(!at_least_as_precise(&t, &precise));
    assert!(at_least_as_precise(&t, &mk_choice(vec![])));
    assert!(is_true_context(&mk_choice(vec![])));
    assert!(is_false_context(&mk_all(vec![])));
}

#[test]
fn compact_absorbs_and_drops() {
    let ctx = Ctx::new(repo());
    let (precise, vague) = contexts(&ctx);
    let t = mk_true(ChoiceIds::root());
    let f = mk_false(ChoiceIds::root());
    assert!(is_false_context(&compact(&mk_choice(vec![precise.clone(), f.clone()]), false)));
    assert_eq!(compact(&mk_choice(vec![t.clone(), precise.clone()]), false), precise);
    assert!(is_true_context(&compact(&mk_all(vec![t.clone(), precise.clone()]), false)));
    assert_eq!(compact(&mk_all(vec![f.clone(), vague.clone()]), false), vague);
    // a failed pack survives as the reason for an otherwise empty choice
    let failed = FailedPack { state: str_ident("closed"), invariant: "inv".to_string() };
    let c = compact(&mk_choice(vec![mk_failed_pack(failed, ChoiceIds::root()), t]), true);
    assert!(matches!(&*c, ContextX::FailedPack(..)));
}

#[test]
fn join_identities() {
    let ctx = Ctx::new(repo());
    let (precise, vague) = contexts(&ctx);
    let t = mk_true(ChoiceIds::root());
    let f = mk_false(ChoiceIds::root());
    assert_eq!(join(&ctx, &f, &precise, MergePoint::Branch), precise);
    assert_eq!(join(&ctx, &precise, &f, MergePoint::Branch), precise);
    assert!(is_true_context(&join(&ctx, &t, &precise, MergePoint::Branch)));
    assert!(is_true_context(&join(&ctx, &precise, &t, MergePoint::Branch)));
    let j = join(&ctx, &precise, &vague, MergePoint::Branch);
    assert!(at_least_as_precise(&precise, &j));
    let c = join(&ctx, &mk_choice(vec![precise.clone(), vague.clone()]), &vague, MergePoint::Branch);
    assert!(matches!(&*c, ContextX::Choice(es) if es.len() == 2));
}

#[test]
fn join_mints_ids_only_when_needed() {
    let ctx = Ctx::new(repo());
    let (precise, vague) = contexts(&ctx);
    let j = join(&ctx, &precise, &vague, MergePoint::Branch);
    assert!(matches!(&*j, ContextX::Tensor(_, ids) if *ids == ChoiceIds::root()));
    let other = match &*vague {
        ContextX::Tensor(t, _) => mk_tensor(t.clone(), ctx.fresh_ids(ChoiceIds::root(), "test")),
        _ => unreachable!(),
    };
    let j = join(&ctx, &precise, &other, MergePoint::Branch);
    assert!(matches!(&*j, ContextX::Tensor(_, ids) if *ids != ChoiceIds::root()));
}

#[test]
fn errors_join_with_or_and_and() {
    let t = mk_true(ChoiceIds::root());
    let failed = FailedPack { state: str_ident("closed"), invariant: "inv".to_string() };
    let fp = mk_failed_pack(failed, ChoiceIds::root());
    let err = |c: &Context| -> Message {
        match check_tensors(c, &mut |_, _| Ok(())) {
            Ok(()) => panic!("expected an error"),
            Err(err) => err,
        }
    };
    let or = err(&mk_choice(vec![t.clone(), fp.clone()]));
    assert!(or.note.starts_with("[") && or.note.contains(" OR "));
    let and = err(&mk_all(vec![t.clone(), fp.clone()]));
    assert!(and.note.starts_with("{") && and.note.contains(" AND "));
    assert!(err(&mk_choice(vec![])).note.starts_with("No available context"));
    assert!(check_tensors(&mk_false(ChoiceIds::root()), &mut |_, _| Ok(())).is_ok());
}

fn socket_call(repo: &StateSpaceRepository, name: &str, cases: &[(&str, &str)]) -> Invocation {
    let cases = cases
        .iter()
        .map(|(pre, post)| MethodCase { pre: pred(repo, pre), post: pred(repo, post), effect_free: false })
        .collect();
    Invocation {
        span: span(),
        signature: method_signature(name, &span(), cases, true, false),
        receiver: None,
        arguments: vec![Location(2)],
        target: None,
        is_super_call: false,
    }
}

#[test]
fn calls_change_argument_states() {
    let repo = repo();
    let ctx = Ctx::new(repo.clone());
    let env = MethodEnv {
        class: None,
        this: None,
        params: vec![Location(2)],
        result: None,
        fields: vec![],
        pre: pred(&repo, "(pred (#0 Socket full alive (states connected)))"),
        post: pred(&repo, "(pred)"),
    };
    let start = match create_initial_method_context(&ctx, &env) {
        Ok(c) => c,
        Err(e) => panic!("{}", e.note),
    };
    let disconnect = socket_call(
        &repo,
        "disconnect",
        &[(
            "(pred (#0 Socket full alive (states connected)))",
            "(pred (#0 Socket full alive (states disconnected)))",
        )],
    );
    assert!(start.check_regular_call_precondition(&ctx, &disconnect).is_ok());
    let after = start.handle_method_call(&ctx, &env, &disconnect);
    assert!(after.check_states(Location(2), &[str_ident("disconnected")], false, &span()).is_ok());

    let send = socket_call(
        &repo,
        "send",
        &[("(pred (#0 Socket share alive (states connected)))", "(pred (#0 Socket share alive (states connected)))")],
    );
    let err = match after.check_regular_call_precondition(&ctx, &send) {
        Ok(()) => panic!("send needs a connected socket"),
        Err(err) => err,
    };
    assert!(err.note.starts_with("argument #0 must be in state connected"));

    // a case that cannot be used drops out
    let either = socket_call(
        &repo,
        "reset",
        &[
            ("(pred (#0 Socket full alive (states connected)))", "(pred (#0 Socket full alive))"),
            ("(pred (#0 Socket full alive (states disconnected)))", "(pred (#0 Socket full alive (states connected)))"),
        ],
    );
    assert!(after.check_regular_call_precondition(&ctx, &either).is_ok());
    let reset = after.handle_method_call(&ctx, &env, &either);
    assert!(reset.check_states(Location(2), &[str_ident("connected")], false, &span()).is_ok());
}

#[test]
fn unsatisfiable_call_makes_rest_unreachable() {
    let repo = repo();
    let ctx = Ctx::new(repo.clone());
    let env = MethodEnv {
        class: None,
        this: None,
        params: vec![Location(2)],
        result: None,
        fields: vec![],
        pre: pred(&repo, "(pred (#0 Socket full alive))"),
        post: pred(&repo, "(pred)"),
    };
    let start = match create_initial_method_context(&ctx, &env) {
        Ok(c) => c,
        Err(e) => panic!("{}", e.note),
    };
    let steal = socket_call(&repo, "steal", &[("(pred (#0 Socket unique alive))", "(pred)")]);
    let err = match start.check_regular_call_precondition(&ctx, &steal) {
        Ok(()) => panic!("full cannot provide unique"),
        Err(err) => err,
    };
    assert!(err.note.starts_with("argument #0 must have permissions unique(alive)"));
    let after = start.handle_method_call(&ctx, &env, &steal);
    assert!(matches!(after.context().map(|c| &**c), Some(ContextX::False(_))));
    assert!(after.check_states(Location(2), &[str_ident("connected")], false, &span()).is_ok());
}

#[test]
fn void_precondition_starts_unreachable() {
    let repo = repo();
    let ctx = Ctx::new(repo.clone());
    let env = MethodEnv {
        class: None,
        this: None,
        params: vec![],
        result: None,
        fields: vec![],
        pre: pred(&repo, "void"),
        post: pred(&repo, "(pred)"),
    };
    let start = match create_initial_method_context(&ctx, &env) {
        Ok(c) => c,
        Err(e) => panic!("{}", e.note),
    };
    assert!(matches!(start.context().map(|c| &**c), Some(ContextX::False(_))));
}

#[test]
fn constructor_establishes_invariant() {
    let repo = repo();
    let ctx = Ctx::new(repo.clone());
    let class = connection_class(&repo);
    let env = MethodEnv {
        class: Some(class),
        this: Some(Location(0)),
        params: vec![Location(3)],
        result: None,
        fields: vec![],
        pre: pred(&repo, "(pred (#0 Socket full alive (states connected)))"),
        post: pred(&repo, "(pred (this Connection full alive (states open) frame))"),
    };
    let start = match create_initial_constructor_context(&ctx, &env) {
        Ok(c) => c,
        Err(e) => panic!("{}", e.note),
    };
    let write = FieldAccess {
        span: span(),
        object: Location(0),
        field: str_ident("sock"),
        source: Some(Location(3)),
    };
    let written = start.prepare_for_field_write(&ctx, &env, &write);
    assert!(!written.is_impossible());
    match written.check_post_condition(&ctx, &env, &span()) {
        Ok(()) => {}
        Err(err) => panic!("{}", err.note),
    }
    // without the socket the invariant of open cannot be established
    match start.check_post_condition(&ctx, &env, &span()) {
        Ok(()) => panic!("sock was never assigned"),
        Err(err) => assert!(err.note.contains("open")),
    }
}

#[test]
fn field_read_of_packed_receiver_unpacks() {
    let repo = repo();
    let ctx = Ctx::new(repo.clone());
    let class = connection_class(&repo);
    let c = tensor(packed_connection(&ctx));
    let read = FieldAccess { span: span(), object: Location(0), field: str_ident("sock"), source: None };
    let after = crate::operations::prepare_for_field_read(&ctx, Some(&class), &c, &read);
    match &*after {
        ContextX::Tensor(t, _) => {
            assert!(t.is_receiver_unpacked());
            assert!(t.get(Location(1)).is_in_state(&str_ident("connected"), false));
        }
        _ => panic!("expected a single tensor, got {}", node_to_string(&context_to_node(&after))),
    }
    // fields without a mapped node are left alone
    let other = FieldAccess { span: span(), object: Location(0), field: str_ident("name"), source: None };
    assert_eq!(crate::operations::prepare_for_field_read(&ctx, Some(&class), &c, &other), c);
}

#[test]
fn dimensions_combine_up_for_bigger_request() {
    let supply = FractionSupply::new();
    let space = space!(Two (dimension alive a (x y)) (dimension alive b (p q)));
    let set = |spec| PermissionSetFromAnnotations::singleton(&space, &spec, true, &supply);
    let both = match set(perm!(full a)).combine(&set(perm!(full b))) {
        Ok(both) => both,
        Err(e) => panic!("{}", e.note),
    };
    assert!(!both.is_read_only());
    assert_eq!(both.to_lattice_element().virtuals().len(), 2);
    let perms = FractionalPermissions::empty().merge_in(&both, &supply);
    let request = PermissionSetFromAnnotations::singleton(&space, &perm!(full alive), false, &supply);
    let split = perms.split_off(&request, &supply);
    assert!(!split.is_unsatisfiable());
    assert_eq!(split.virtuals().len(), 1);
    assert_eq!(split.virtuals()[0].root(), &str_ident("alive"));
    // one dimension alone is not enough
    let only_a = FractionalPermissions::empty().merge_in(&set(perm!(full a)), &supply);
    assert!(only_a.split_off(&request, &supply).is_unsatisfiable());
}

#[test]
fn replace_and_forget_state_info() {
    let supply = FractionSupply::new();
    let space = connection();
    let perms = entry(&space, &perm!(share alive (states open)), &supply);
    assert!(perms.is_in_state(&str_ident("open"), false));
    let replaced = perms.replace_state_info(&[str_ident("closed")], false);
    assert!(replaced.is_in_state(&str_ident("closed"), false));
    assert!(!replaced.is_in_state(&str_ident("open"), false));
    assert!(!perms.forget_share_and_pure_states().is_in_state(&str_ident("open"), false));
    let full = entry(&space, &perm!(full alive (states open)), &supply);
    assert!(full.forget_share_and_pure_states().is_in_state(&str_ident("open"), false));
    assert!(!full.forget_state_info().is_in_state(&str_ident("open"), false));
}

#[test]
fn repository_lookup() {
    let repo = repo();
    assert!(repo.get("Socket").is_some());
    assert!(repo.get("File").is_none());
    assert_eq!(repo.get_or_top("File").name, repo.top().name);
    let file = repo.get_or_insert_with("File", || space!(File (dimension alive f (readable eof))));
    assert!(file.is_known("eof"));
    let again = repo.get_or_insert_with("File", || panic!("already registered"));
    assert!(Arc::ptr_eq(&file, &again));
}

#[test]
fn choice_ids_track_branches() {
    let ctx = Ctx::new(repo());
    let root = ChoiceIds::root();
    let a = ctx.fresh_ids(root, "a");
    let b = ctx.fresh_ids(root, "b");
    let c = ctx.fresh_ids(a, "c");
    assert_eq!(a.parent, root.choice);
    assert_eq!(c.parent, a.choice);
    assert_eq!(ctx.choices().common_ancestor(b.choice, c.choice), root.choice);
    assert_eq!(crate::context::younger_ids(a, c), c);
    let (precise, vague) = contexts(&ctx);
    assert!(crate::context::is_single_context(&mk_choice(vec![precise.clone()])));
    assert!(!crate::context::is_single_context(&mk_choice(vec![precise, vague])));
}

#[test]
fn parameter_without_permission_fails_checks() {
    let repo = repo();
    let ctx = Ctx::new(repo.clone());
    let env = MethodEnv {
        class: None,
        this: None,
        params: vec![Location(2)],
        result: None,
        fields: vec![],
        pre: pred(&repo, "(pred)"),
        post: pred(&repo, "(pred)"),
    };
    let start = match create_initial_method_context(&ctx, &env) {
        Ok(c) => c,
        Err(e) => panic!("{}", e.note),
    };
    let connect = socket_call(
        &repo,
        "read",
        &[("(pred (#0 Socket unique alive (states connected)))", "(pred (#0 Socket unique alive))")],
    );
    let err = match start.check_regular_call_precondition(&ctx, &connect) {
        Ok(()) => panic!("an untracked parameter has no permissions"),
        Err(err) => err,
    };
    assert!(err.note.starts_with("argument #0 must be in state connected"));
    assert!(start.check_states(Location(2), &[str_ident("connected")], false, &span()).is_err());
    let after = start.handle_method_call(&ctx, &env, &connect);
    assert!(matches!(after.context().map(|c| &**c), Some(ContextX::False(_))));
}

#[test]
#[should_panic(expected = "internal error")]
fn join_of_different_unpacked_permissions_panics() {
    let ctx = Ctx::new(repo());
    let space = connection();
    let alive = str_ident("alive");
    let full = entry(&space, &perm!(full alive frame), &ctx.supply).unpack(&space, &alive, &ctx.supply);
    let pure = entry(&space, &perm!(pure alive frame), &ctx.supply).unpack(&space, &alive, &ctx.supply);
    full.join(&pure, MergePoint::Branch, &ctx.supply);
}

#[test]
fn new_object_gets_constructor_postcondition() {
    let repo = repo();
    let ctx = Ctx::new(repo.clone());
    let env = MethodEnv {
        class: None,
        this: None,
        params: vec![],
        result: None,
        fields: vec![],
        pre: pred(&repo, "(pred)"),
        post: pred(&repo, "(pred)"),
    };
    let start = match create_initial_method_context(&ctx, &env) {
        Ok(c) => c,
        Err(e) => panic!("{}", e.note),
    };
    let case = MethodCase {
        pre: pred(&repo, "(pred)"),
        post: pred(&repo, "(pred (this Socket unique alive (states connected)))"),
        effect_free: false,
    };
    let new_socket = Invocation {
        span: span(),
        signature: method_signature("Socket", &span(), vec![case], false, true),
        receiver: None,
        arguments: vec![],
        target: Some(Location(5)),
        is_super_call: false,
    };
    let connected = [str_ident("connected")];
    assert!(start.check_states(Location(5), &connected, false, &span()).is_err());
    let after = start.handle_new_object(&ctx, &new_socket);
    assert!(after.check_states(Location(5), &connected, false, &span()).is_ok());
    let steal = socket_call(&repo, "steal", &[("(pred (#0 Socket unique alive))", "(pred)")]);
    let steal = Invocation { arguments: vec![Location(5)], ..steal };
    assert!(after.check_regular_call_precondition(&ctx, &steal).is_ok());
}

#[test]
fn constructor_call_gives_receiver_callee_postcondition() {
    let repo = repo();
    let ctx = Ctx::new(repo.clone());
    let env = MethodEnv {
        class: Some(connection_class(&repo)),
        this: Some(Location(0)),
        params: vec![Location(3)],
        result: None,
        fields: vec![],
        pre: pred(&repo, "(pred (#0 Socket full alive (states connected)))"),
        post: pred(&repo, "(pred)"),
    };
    let start = match create_initial_constructor_context(&ctx, &env) {
        Ok(c) => c,
        Err(e) => panic!("{}", e.note),
    };
    let case = MethodCase {
        pre: pred(&repo, "(pred (#0 Socket full alive (states connected)))"),
        post: pred(&repo, "(pred (this Connection full alive (states open)))"),
        effect_free: false,
    };
    let this_call = Invocation {
        span: span(),
        signature: method_signature("Connection", &span(), vec![case], false, true),
        receiver: None,
        arguments: vec![Location(3)],
        target: None,
        is_super_call: true,
    };
    let open = [str_ident("open")];
    assert!(start.check_states(Location(0), &open, false, &span()).is_err());
    let after = start.handle_constructor_call(&ctx, &this_call);
    assert!(after.check_states(Location(0), &open, false, &span()).is_ok());
    // the argument was handed over and its state forgotten
    assert!(after.check_states(Location(3), &[str_ident("connected")], false, &span()).is_err());
    match after.context().map(|c| &**c) {
        Some(ContextX::Tensor(t, _)) => assert!(t.get(Location(0)).is_unpacked()),
        _ => panic!("expected a single tensor"),
    }
}

#[test]
fn make_modifiable_needs_writable_permission() {
    let supply = FractionSupply::new();
    let space = socket();
    let alive = str_ident("alive");
    for spec in vec![perm!(unique alive), perm!(full alive (states connected))] {
        let perms = entry(&space, &spec, &supply).make_modifiable(&alive, false);
        assert!(!perms.is_unsatisfiable());
        assert!(perms.virtuals().iter().all(|p| !p.is_read_only()));
    }
    for spec in vec![perm!(pure alive), perm!(immutable alive)] {
        let perms = entry(&space, &spec, &supply).make_modifiable(&alive, false);
        assert!(perms.is_unsatisfiable());
    }
    let frame = entry(&space, &perm!(full alive frame), &supply);
    assert!(!frame.make_modifiable(&alive, true).is_unsatisfiable());
    let virt = frame.make_modifiable(&alive, false);
    assert!(virt.impossible_reason().map_or(false, |r| r.starts_with("No permission available for root")));
}

#[test]
fn precision_is_a_preorder_over_derived_permissions() {
    let supply = FractionSupply::new();
    let space = space!(Two (dimension alive a (x y)) (dimension alive b (p q)));
    let base = entry(&space, &perm!(full alive), &supply);
    let mut sets = vec![FractionalPermissions::bottom()];
    for sa in [None, Some("x"), Some("y")].iter() {
        for sb in [None, Some("p"), Some("q")].iter() {
            let mut p = base.clone();
            for s in sa.iter().chain(sb.iter()) {
                p = p.learn_temporary_state_info(&str_ident(s), false);
            }
            sets.push(p);
        }
    }
    let learned = sets.len();
    for i in 1..learned {
        for j in i + 1..learned {
            let joined = sets[i].join(&sets[j], MergePoint::Branch, &supply);
            sets.push(joined);
        }
    }
    let unique = PermissionSetFromAnnotations::singleton(&space, &perm!(unique alive), false, &supply);
    sets.push(base.split_off(&unique, &supply));

    let n = sets.len();
    let leq: Vec<Vec<bool>> =
        sets.iter().map(|a| sets.iter().map(|b| a.at_least_as_precise(b)).collect()).collect();
    for i in 0..n {
        assert!(leq[i][i]);
        for j in 0..n {
            for k in 0..n {
                if leq[i][j] && leq[j][k] {
                    assert!(leq[i][k], "precision not transitive for {}, {}, {}", i, j, k);
                }
            }
        }
    }
    // sets[4] learned x on top of base
    assert!(leq[4][1]);
    assert!(!leq[1][4]);
    // bottom is below everything and the unsatisfiable one above everything
    assert!((0..n).all(|i| leq[0][i] && leq[i][n - 1]));
}
