//! Degree-of-freedom reference numbers.
//!
//! Files store DOFs as small integers (UX = 1, UY = 2, ...). Codes 13-18 and
//! 27-32 are spares.

const DOF_LABELS: [(i32, &str); 20] = [
    (1, "UX"),
    (2, "UY"),
    (3, "UZ"),
    (4, "ROTX"),
    (5, "ROTY"),
    (6, "ROTZ"),
    (7, "AX"),
    (8, "AY"),
    (9, "AZ"),
    (10, "VX"),
    (11, "VY"),
    (12, "VZ"),
    (19, "PRES"),
    (20, "TEMP"),
    (21, "VOLT"),
    (22, "MAG"),
    (23, "ENKE"),
    (24, "ENDS"),
    (25, "EMF"),
    (26, "CURR"),
];

/// Label of DOF reference number `code`, `None` for spares and unknown codes.
pub fn dof_label(code: i32) -> Option<&'static str> {
    DOF_LABELS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, label)| *label)
}

/// Reference number of `label` (case-insensitive).
pub fn dof_code(label: &str) -> Option<i32> {
    DOF_LABELS
        .iter()
        .find(|(_, l)| l.eq_ignore_ascii_case(label))
        .map(|(code, _)| *code)
}
