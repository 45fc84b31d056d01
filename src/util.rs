pub(crate) fn vec_map<A, B, F: FnMut(&A) -> B>(v: &[A], f: F) -> Vec<B> {
    v.iter().map(f).collect::<Vec<B>>()
}

/// Insert x unless an equal element is already there (keeps insertion order)
pub(crate) fn push_unique<A: PartialEq>(v: &mut Vec<A>, x: A) {
    if !v.contains(&x) {
        v.push(x);
    }
}

