//! Element data used by the structure routines.

/// (symbol, covalent radius in Å), indexed by atomic number - 1.
///
/// Radii from Cordero et al., Dalton Trans. 2008, 2832.
const ELEMENTS: &[(&str, f64)] = &[
    ("H", 0.31),
    ("He", 0.28),
    ("Li", 1.28),
    ("Be", 0.96),
    ("B", 0.84),
    ("C", 0.76),
    ("N", 0.71),
    ("O", 0.66),
    ("F", 0.57),
    ("Ne", 0.58),
    ("Na", 1.66),
    ("Mg", 1.41),
    ("Al", 1.21),
    ("Si", 1.11),
    ("P", 1.07),
    ("S", 1.05),
    ("Cl", 1.02),
    ("Ar", 1.06),
    ("K", 2.03),
    ("Ca", 1.76),
    ("Sc", 1.70),
    ("Ti", 1.60),
    ("V", 1.53),
    ("Cr", 1.39),
    ("Mn", 1.39),
    ("Fe", 1.32),
    ("Co", 1.26),
    ("Ni", 1.24),
    ("Cu", 1.32),
    ("Zn", 1.22),
    ("Ga", 1.22),
    ("Ge", 1.20),
    ("As", 1.19),
    ("Se", 1.20),
    ("Br", 1.20),
    ("Kr", 1.16),
    ("Rb", 2.20),
    ("Sr", 1.95),
    ("Y", 1.90),
    ("Zr", 1.75),
    ("Nb", 1.64),
    ("Mo", 1.54),
    ("Tc", 1.47),
    ("Ru", 1.46),
    ("Rh", 1.42),
    ("Pd", 1.39),
    ("Ag", 1.45),
    ("Cd", 1.44),
    ("In", 1.42),
    ("Sn", 1.39),
    ("Sb", 1.39),
    ("Te", 1.38),
    ("I", 1.39),
    ("Xe", 1.40),
    ("Cs", 2.44),
    ("Ba", 2.15),
    ("La", 2.07),
    ("Ce", 2.04),
    ("Pr", 2.03),
    ("Nd", 2.01),
    ("Pm", 1.99),
    ("Sm", 1.98),
    ("Eu", 1.98),
    ("Gd", 1.96),
    ("Tb", 1.94),
    ("Dy", 1.92),
    ("Ho", 1.92),
    ("Er", 1.89),
    ("Tm", 1.90),
    ("Yb", 1.87),
    ("Lu", 1.87),
    ("Hf", 1.75),
    ("Ta", 1.70),
    ("W", 1.62),
    ("Re", 1.51),
    ("Os", 1.44),
    ("Ir", 1.41),
    ("Pt", 1.36),
    ("Au", 1.36),
    ("Hg", 1.32),
    ("Tl", 1.45),
    ("Pb", 1.46),
    ("Bi", 1.48),
    ("Po", 1.40),
    ("At", 1.50),
    ("Rn", 1.50),
    ("Fr", 2.60),
    ("Ra", 2.21),
    ("Ac", 2.15),
    ("Th", 2.06),
    ("Pa", 2.00),
    ("U", 1.96),
    ("Np", 1.90),
    ("Pu", 1.87),
    ("Am", 1.80),
    ("Cm", 1.69),
];

/// Radius used for symbols missing from the table (ASE uses 0.2 for X).
const FALLBACK_RADIUS: f64 = 0.2;

/// Atomic number of `symbol`, if it is a known element.
pub fn atomic_number(symbol: &str) -> Option<usize> {
    ELEMENTS
        .iter()
        .position(|(s, _)| *s == symbol)
        .map(|i| i + 1)
}

/// Whether `symbol` names a known element.
pub fn is_element(symbol: &str) -> bool {
    atomic_number(symbol).is_some()
}

/// Covalent radius of `symbol` in Å.
pub fn covalent_radius(symbol: &str) -> f64 {
    ELEMENTS
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, r)| *r)
        .unwrap_or(FALLBACK_RADIUS)
}

/// Extract the element symbol from a site label or species string such as
/// `Na1`, `Fe2+`, `O2-` or `cl`.
pub fn symbol_from_label(label: &str) -> Option<String> {
    let letters: String = label
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    let mut chars = letters.chars();
    let first = chars.next()?.to_ascii_uppercase();

    // Prefer a two-letter symbol when the label supports one.
    if let Some(second) = chars.next() {
        let two = format!("{first}{}", second.to_ascii_lowercase());
        if is_element(&two) {
            return Some(two);
        }
    }
    let one = first.to_string();
    is_element(&one).then_some(one)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(atomic_number("H"), Some(1));
        assert_eq!(atomic_number("Na"), Some(11));
        assert_eq!(atomic_number("Cm"), Some(96));
        assert_eq!(atomic_number("Xx"), None);
        assert!((covalent_radius("Cl") - 1.02).abs() < 1e-12);
        assert!((covalent_radius("Xx") - FALLBACK_RADIUS).abs() < 1e-12);
    }

    #[test]
    fn test_symbol_from_label() {
        assert_eq!(symbol_from_label("Na1").as_deref(), Some("Na"));
        assert_eq!(symbol_from_label("Fe2+").as_deref(), Some("Fe"));
        assert_eq!(symbol_from_label("O2-").as_deref(), Some("O"));
        assert_eq!(symbol_from_label("CL").as_deref(), Some("Cl"));
        assert_eq!(symbol_from_label("Ob").as_deref(), Some("O"));
        assert_eq!(symbol_from_label("123"), None);
    }
}
