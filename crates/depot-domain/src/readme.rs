/// README filenames probed at the project root, in order. The lookup is
/// non-recursive and case-sensitive beyond these exact variants.
pub const README_CANDIDATES: [&str; 3] = ["README.md", "readme.md", "Readme.md"];
