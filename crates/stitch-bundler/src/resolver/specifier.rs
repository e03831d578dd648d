//! Classification of import specifiers.

/// Shape of an import specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecifierKind<'a> {
    /// `./x`, `../x`, `.` or `..`.
    Relative(&'a str),
    /// `/x`, relative to the importer's origin root.
    Absolute(&'a str),
    /// `pkg`, `pkg@range/sub`, `@scope/pkg/sub`, …
    Bare(BareSpecifier<'a>),
}

/// A bare package specifier split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BareSpecifier<'a> {
    pub name: &'a str,
    pub range: Option<&'a str>,
    pub subpath: Option<&'a str>,
}

pub fn classify(specifier: &str) -> Option<SpecifierKind<'_>> {
    if specifier.is_empty() {
        return None;
    }
    if specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
    {
        return Some(SpecifierKind::Relative(specifier));
    }
    if specifier.starts_with('/') {
        return Some(SpecifierKind::Absolute(specifier));
    }
    parse_bare(specifier).map(SpecifierKind::Bare)
}

/// Split `@scope/name@range/sub/path` into name, range and subpath.
pub fn parse_bare(specifier: &str) -> Option<BareSpecifier<'_>> {
    let scoped = specifier.starts_with('@');
    if scoped && !specifier.contains('/') {
        return None;
    }

    let mut slashes = specifier.match_indices('/').map(|(idx, _)| idx);
    let boundary = if scoped { slashes.nth(1) } else { slashes.next() };
    let (package_part, subpath) = match boundary {
        Some(idx) => (
            &specifier[..idx],
            Some(&specifier[idx + 1..]).filter(|rest| !rest.is_empty()),
        ),
        None => (specifier, None),
    };

    // The first character is either a scope marker or part of the name.
    let (name, range) = match package_part.get(1..).and_then(|rest| rest.find('@')) {
        Some(idx) => {
            let at = idx + 1;
            let range = &package_part[at + 1..];
            (&package_part[..at], (!range.is_empty()).then_some(range))
        }
        None => (package_part, None),
    };

    if name.is_empty() || name.ends_with('/') {
        return None;
    }

    Some(BareSpecifier {
        name,
        range,
        subpath,
    })
}
