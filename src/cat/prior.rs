//! Starting theta from what we know about a learner before the first item.

/// Course names and their starting theta. Longer names are matched first
/// when searching inside free text, so "calc 3" wins over "calc".
const COURSE_THETA: &[(&str, f64)] = &[
    ("calculus 1", 2.3),
    ("calculus 2", 2.5),
    ("calculus 3", 2.7),
    ("calculus", 2.5),
    ("calc 1", 2.3),
    ("calc 2", 2.5),
    ("calc 3", 2.7),
    ("calc", 2.5),
    ("precalculus", 2.0),
    ("pre-calc", 2.0),
    ("pre calc", 2.0),
    ("precalc", 2.0),
    ("trigonometry", 1.8),
    ("trig", 1.8),
    ("algebra 2", 1.5),
    ("algebra ii", 1.5),
    ("algebra-2", 1.5),
    ("geometry", 1.0),
    ("algebra 1", 0.5),
    ("algebra i", 0.5),
    ("algebra-1", 0.5),
    ("pre-algebra", 0.0),
    ("prealgebra", 0.0),
    ("pre algebra", 0.0),
    ("algebra", 0.5),
    ("college", 2.0),
];

const GRADE_BAND_THETA: &[(&str, f64)] = &[
    ("prek", -2.0),
    ("pre-k", -2.0),
    ("prekindergarten", -2.0),
    ("k", -1.5),
    ("kindergarten", -1.5),
    ("k-5", -0.5),
    ("5-8", 0.5),
    ("8-12", 1.2),
];

/// Upper grade bound (inclusive) and theta for numeric grades.
const GRADE_NUMBER_THETA: &[(i32, f64)] = &[
    (0, -2.5),
    (2, -2.0),
    (4, -1.0),
    (5, -0.5),
    (6, 0.0),
    (7, 0.3),
    (8, 0.6),
    (9, 0.9),
    (10, 1.2),
    (11, 1.5),
    (12, 1.8),
    (13, 2.0),
];

const GRADUATE_THETA: f64 = 2.5;

/// Theta for a math course name, exact match first, then substring.
pub fn theta_from_course(course: &str) -> Option<f64> {
    let course = course.trim().to_lowercase();
    if course.is_empty() {
        return None;
    }

    if let Some(&(_, theta)) = COURSE_THETA.iter().find(|(name, _)| *name == course) {
        return Some(theta);
    }

    COURSE_THETA
        .iter()
        .filter(|(name, _)| contains_word(&course, name))
        .max_by_key(|(name, _)| name.len())
        .map(|&(_, theta)| theta)
}

/// Theta for a grade given as a band ("k-5"), a word ("kindergarten",
/// "college") or a number ("7", "7th").
pub fn theta_from_grade(grade: &str) -> Option<f64> {
    let grade = grade.trim().to_lowercase();
    if grade.is_empty() {
        return None;
    }

    if let Some(&(_, theta)) = GRADE_BAND_THETA.iter().find(|(band, _)| *band == grade) {
        return Some(theta);
    }

    let number = if grade.contains("kinder") {
        0
    } else if grade.contains("graduate") || grade.contains("masters") || grade.contains("phd") {
        return Some(GRADUATE_THETA);
    } else if grade.contains("college") || grade.contains("university") || grade.contains("undergrad") {
        13
    } else {
        let digits: String = grade.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<i32>().ok()?
    };

    Some(
        GRADE_NUMBER_THETA
            .iter()
            .find(|(max, _)| number <= *max)
            .map(|&(_, theta)| theta)
            .unwrap_or(GRADUATE_THETA),
    )
}

/// Prior mean for a new starting-point session. Course beats grade; with
/// neither, the population mean of 0.
pub fn starting_theta(grade: Option<&str>, course: Option<&str>) -> f64 {
    course
        .and_then(theta_from_course)
        .or_else(|| grade.and_then(theta_from_grade))
        .unwrap_or(0.0)
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}
