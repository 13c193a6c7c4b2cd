//! Grammar registry: which tree-sitter grammar handles which file, and how
//! its node kinds map onto element tags.

use std::path::Path;

use tree_sitter::Language;

/// Per-language tree construction settings.
pub struct Grammar {
    /// Language identifier (e.g. "python").
    pub id: &'static str,
    /// File extensions handled, without the dot.
    pub extensions: &'static [&'static str],
    language: fn() -> Language,
    /// Node kinds renamed to a conventional tag. Kinds not listed are
    /// converted to PascalCase.
    pub tag_aliases: Option<&'static phf::Map<&'static str, &'static str>>,
    /// Container kinds that get no position of their own.
    pub unpositioned_kinds: &'static [&'static str],
    /// Kinds emitted as leaves even though the grammar gives them children
    /// (string literals with interpolation parts, for instance).
    pub opaque_kinds: &'static [&'static str],
    /// Identifier kinds, renamed consistently by normalization.
    pub identifier_kinds: &'static [&'static str],
    /// String literal kinds, canonicalized by normalization.
    pub string_kinds: &'static [&'static str],
    /// Numeric literal kinds, canonicalized by normalization.
    pub number_kinds: &'static [&'static str],
}

impl Grammar {
    /// The tree-sitter language for this grammar.
    pub fn language(&self) -> Language {
        (self.language)()
    }

    /// Element tag for a node kind.
    pub fn tag_for(&self, kind: &str) -> String {
        if let Some(alias) = self.tag_aliases.and_then(|m| m.get(kind)) {
            return (*alias).to_string();
        }
        pascal_case(kind)
    }

    pub fn is_unpositioned(&self, kind: &str) -> bool {
        self.unpositioned_kinds.contains(&kind)
    }

    pub fn is_opaque(&self, kind: &str) -> bool {
        self.opaque_kinds.contains(&kind)
    }
}

impl std::fmt::Debug for Grammar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grammar").field("id", &self.id).finish()
    }
}

/// Python node kinds spelled the way Python's own `ast` module names them,
/// so rules read like `//FunctionDef[@name='main']`.
static PYTHON_TAGS: phf::Map<&'static str, &'static str> = phf::phf_map! {
    "module" => "Module",
    "import_statement" => "Import",
    "import_from_statement" => "ImportFrom",
    "aliased_import" => "alias",
    "function_definition" => "FunctionDef",
    "class_definition" => "ClassDef",
    "lambda" => "Lambda",
    "call" => "Call",
    "keyword_argument" => "keyword",
    "attribute" => "Attribute",
    "subscript" => "Subscript",
    "identifier" => "Name",
    "assignment" => "Assign",
    "augmented_assignment" => "AugAssign",
    "return_statement" => "Return",
    "if_statement" => "If",
    "for_statement" => "For",
    "while_statement" => "While",
    "try_statement" => "Try",
    "except_clause" => "ExceptHandler",
    "with_statement" => "With",
    "raise_statement" => "Raise",
    "assert_statement" => "Assert",
    "pass_statement" => "Pass",
    "break_statement" => "Break",
    "continue_statement" => "Continue",
    "delete_statement" => "Delete",
    "global_statement" => "Global",
    "nonlocal_statement" => "Nonlocal",
    "expression_statement" => "Expr",
    "binary_operator" => "BinOp",
    "boolean_operator" => "BoolOp",
    "comparison_operator" => "Compare",
    "unary_operator" => "UnaryOp",
    "not_operator" => "UnaryOp",
    "conditional_expression" => "IfExp",
    "list" => "List",
    "dictionary" => "Dict",
    "set" => "Set",
    "tuple" => "Tuple",
    "list_comprehension" => "ListComp",
    "dictionary_comprehension" => "DictComp",
    "set_comprehension" => "SetComp",
    "generator_expression" => "GeneratorExp",
    "string" => "Constant",
    "concatenated_string" => "Constant",
    "integer" => "Constant",
    "float" => "Constant",
    "true" => "Constant",
    "false" => "Constant",
    "none" => "Constant",
    "await" => "Await",
    "yield" => "Yield",
};

fn python() -> Language {
    tree_sitter_python::LANGUAGE.into()
}
fn rust_lang() -> Language {
    tree_sitter_rust::LANGUAGE.into()
}
fn go() -> Language {
    tree_sitter_go::LANGUAGE.into()
}
fn javascript() -> Language {
    tree_sitter_javascript::LANGUAGE.into()
}
fn typescript() -> Language {
    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
}
fn tsx() -> Language {
    tree_sitter_typescript::LANGUAGE_TSX.into()
}
fn java() -> Language {
    tree_sitter_java::LANGUAGE.into()
}
fn c() -> Language {
    tree_sitter_c::LANGUAGE.into()
}
fn cpp() -> Language {
    tree_sitter_cpp::LANGUAGE.into()
}
fn scala() -> Language {
    tree_sitter_scala::LANGUAGE.into()
}
fn swift() -> Language {
    tree_sitter_swift::LANGUAGE.into()
}

static GRAMMARS: [Grammar; 11] = [
    Grammar {
        id: "python",
        extensions: &["py", "pyi"],
        language: python,
        tag_aliases: Some(&PYTHON_TAGS),
        unpositioned_kinds: &["module", "block", "parameters", "argument_list"],
        opaque_kinds: &["string", "concatenated_string"],
        identifier_kinds: &["identifier"],
        string_kinds: &["string", "concatenated_string"],
        number_kinds: &["integer", "float"],
    },
    Grammar {
        id: "rust",
        extensions: &["rs"],
        language: rust_lang,
        tag_aliases: None,
        unpositioned_kinds: &["source_file", "block", "declaration_list", "parameters", "arguments"],
        opaque_kinds: &["string_literal", "raw_string_literal", "char_literal"],
        identifier_kinds: &["identifier", "field_identifier", "type_identifier"],
        string_kinds: &["string_literal", "raw_string_literal", "char_literal"],
        number_kinds: &["integer_literal", "float_literal"],
    },
    Grammar {
        id: "go",
        extensions: &["go"],
        language: go,
        tag_aliases: None,
        unpositioned_kinds: &["source_file", "block", "parameter_list", "argument_list"],
        opaque_kinds: &["interpreted_string_literal", "raw_string_literal"],
        identifier_kinds: &["identifier", "field_identifier", "type_identifier", "package_identifier"],
        string_kinds: &["interpreted_string_literal", "raw_string_literal", "rune_literal"],
        number_kinds: &["int_literal", "float_literal", "imaginary_literal"],
    },
    Grammar {
        id: "javascript",
        extensions: &["js", "jsx", "mjs", "cjs"],
        language: javascript,
        tag_aliases: None,
        unpositioned_kinds: &["program", "statement_block", "formal_parameters", "arguments"],
        opaque_kinds: &["string", "template_string", "regex"],
        identifier_kinds: &["identifier", "property_identifier", "shorthand_property_identifier"],
        string_kinds: &["string", "template_string"],
        number_kinds: &["number"],
    },
    Grammar {
        id: "typescript",
        extensions: &["ts", "mts", "cts"],
        language: typescript,
        tag_aliases: None,
        unpositioned_kinds: &["program", "statement_block", "formal_parameters", "arguments"],
        opaque_kinds: &["string", "template_string", "regex"],
        identifier_kinds: &["identifier", "property_identifier", "type_identifier"],
        string_kinds: &["string", "template_string"],
        number_kinds: &["number"],
    },
    Grammar {
        id: "tsx",
        extensions: &["tsx"],
        language: tsx,
        tag_aliases: None,
        unpositioned_kinds: &["program", "statement_block", "formal_parameters", "arguments"],
        opaque_kinds: &["string", "template_string", "regex"],
        identifier_kinds: &["identifier", "property_identifier", "type_identifier"],
        string_kinds: &["string", "template_string"],
        number_kinds: &["number"],
    },
    Grammar {
        id: "java",
        extensions: &["java"],
        language: java,
        tag_aliases: None,
        unpositioned_kinds: &["program", "block", "class_body", "formal_parameters", "argument_list"],
        opaque_kinds: &["string_literal", "character_literal"],
        identifier_kinds: &["identifier", "type_identifier"],
        string_kinds: &["string_literal", "character_literal"],
        number_kinds: &["decimal_integer_literal", "decimal_floating_point_literal", "hex_integer_literal"],
    },
    Grammar {
        id: "c",
        extensions: &["c", "h"],
        language: c,
        tag_aliases: None,
        unpositioned_kinds: &["translation_unit", "compound_statement", "parameter_list", "argument_list"],
        opaque_kinds: &["string_literal", "char_literal"],
        identifier_kinds: &["identifier", "field_identifier", "type_identifier"],
        string_kinds: &["string_literal", "char_literal"],
        number_kinds: &["number_literal"],
    },
    Grammar {
        id: "cpp",
        extensions: &["cpp", "cc", "cxx", "hpp", "hh"],
        language: cpp,
        tag_aliases: None,
        unpositioned_kinds: &["translation_unit", "compound_statement", "parameter_list", "argument_list"],
        opaque_kinds: &["string_literal", "char_literal", "raw_string_literal"],
        identifier_kinds: &["identifier", "field_identifier", "type_identifier", "namespace_identifier"],
        string_kinds: &["string_literal", "char_literal", "raw_string_literal"],
        number_kinds: &["number_literal"],
    },
    Grammar {
        id: "scala",
        extensions: &["scala", "sc"],
        language: scala,
        tag_aliases: None,
        unpositioned_kinds: &["compilation_unit", "block", "template_body", "parameters", "arguments"],
        opaque_kinds: &["string", "interpolated_string_expression"],
        identifier_kinds: &["identifier", "type_identifier"],
        string_kinds: &["string", "interpolated_string_expression"],
        number_kinds: &["integer_literal", "floating_point_literal"],
    },
    Grammar {
        id: "swift",
        extensions: &["swift"],
        language: swift,
        tag_aliases: None,
        unpositioned_kinds: &["source_file", "function_body", "class_body", "statements"],
        opaque_kinds: &["line_string_literal", "multi_line_string_literal"],
        identifier_kinds: &["simple_identifier", "type_identifier"],
        string_kinds: &["line_string_literal", "multi_line_string_literal"],
        number_kinds: &["integer_literal", "real_literal"],
    },
];

/// Grammar for a file extension (without the dot).
pub fn grammar_for_extension(ext: &str) -> Option<&'static Grammar> {
    GRAMMARS.iter().find(|g| g.extensions.contains(&ext))
}

/// Grammar for a path, based on its extension.
pub fn grammar_for_path(path: &Path) -> Option<&'static Grammar> {
    let ext = path.extension().and_then(|e| e.to_str())?;
    grammar_for_extension(ext)
}

/// All registered file extensions.
pub fn supported_extensions() -> Vec<&'static str> {
    GRAMMARS
        .iter()
        .flat_map(|g| g.extensions.iter().copied())
        .collect()
}

/// `import_from_statement` → `ImportFromStatement`.
fn pascal_case(kind: &str) -> String {
    let mut out = String::with_capacity(kind.len());
    let mut upper = true;
    for ch in kind.chars() {
        if ch == '_' || ch == '-' {
            upper = true;
            continue;
        }
        if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}
