//! CIFAR-10 label names, indexed by label byte.

pub const CLASS_NAMES_EN: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

pub const CLASS_NAMES_ZH: [&str; 10] = [
    "飛機", "汽車", "鳥", "貓", "鹿", "狗", "青蛙", "馬", "船", "卡車",
];

/// `(localized, english)` for a label, or placeholders past the known classes.
pub fn class_names(label: usize) -> (&'static str, &'static str) {
    match (CLASS_NAMES_ZH.get(label), CLASS_NAMES_EN.get(label)) {
        (Some(zh), Some(en)) => (zh, en),
        _ => ("?", "unknown"),
    }
}
