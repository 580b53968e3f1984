//! NEXUS document rendering

use super::matrix::{Matrix, GAP, MISSING};

/// Render a matrix as a NEXUS taxa + characters document
pub fn render(matrix: &Matrix) -> String {
    let taxlabels = matrix
        .rows
        .iter()
        .map(|(label, _)| label.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let symbols = matrix
        .symbols
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    let rows = matrix
        .rows
        .iter()
        .map(|(label, chars)| format!("{} {}", label, chars))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "#nexus\n\
         BEGIN Taxa;\n\
         DIMENSIONS ntax={ntax};\n\
         TAXLABELS\n\
         {taxlabels}\n\
         ;\n\
         END;\n\
         BEGIN Characters;\n\
         DIMENSIONS nchar={nchar};\n\
         \n\
         FORMAT\n    \
         datatype=STANDARD\n    \
         missing={missing}\n    \
         gap={gap}\n    \
         symbols=\"{symbols}\"\n\
         ;\n\
         MATRIX\n\
         {rows}\n\
         ;\n\
         END;\n",
        ntax = matrix.rows.len(),
        taxlabels = taxlabels,
        nchar = matrix.nchar,
        missing = MISSING,
        gap = GAP,
        symbols = symbols,
        rows = rows,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_layout() {
        let matrix = Matrix {
            rows: vec![("A".into(), "ab".into()), ("B_corrector".into(), "a?".into())],
            nchar: 2,
            symbols: ['a', 'b'].into_iter().collect(),
        };

        let expected = "#nexus\n\
BEGIN Taxa;\n\
DIMENSIONS ntax=2;\n\
TAXLABELS\n\
A\n\
B_corrector\n\
;\n\
END;\n\
BEGIN Characters;\n\
DIMENSIONS nchar=2;\n\
\n\
FORMAT\n\
\x20   datatype=STANDARD\n\
\x20   missing=-\n\
\x20   gap=?\n\
\x20   symbols=\"a b\"\n\
;\n\
MATRIX\n\
A ab\n\
B_corrector a?\n\
;\n\
END;\n";
        assert_eq!(render(&matrix), expected);
    }
}
