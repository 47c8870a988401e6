use clap::ValueEnum;

/// Loop order of the matrix multiply
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Layout {
    /// C[i][j] += A[i][k] * B[k][j], rows outermost
    RowMajor,
    /// C[i][j] += A[k][i] * B[j][k], columns outermost
    ColMajor,
}

/// Square matrix stored row by row
pub struct Matrix {
    n: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0.0; n * n],
        }
    }

    pub fn from_fn<F: Fn(usize, usize) -> f64>(n: usize, f: F) -> Self {
        let mut m = Self::zeros(n);
        for i in 0..n {
            for j in 0..n {
                m.data[i * n + j] = f(i, j);
            }
        }
        m
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    /// Sum of all elements
    pub fn checksum(&self) -> f64 {
        self.data.iter().sum()
    }
}

/// The inputs of the test experiment: A[i][j] = i + j, B[i][j] = i - j
pub fn inputs(n: usize) -> (Matrix, Matrix) {
    let a = Matrix::from_fn(n, |i, j| (i + j) as f64);
    let b = Matrix::from_fn(n, |i, j| i as f64 - j as f64);
    (a, b)
}

pub fn multiply(a: &Matrix, b: &Matrix, layout: Layout) -> Matrix {
    let n = a.n;
    let mut c = Matrix::zeros(n);
    match layout {
        Layout::RowMajor => {
            for i in 0..n {
                for j in 0..n {
                    let mut acc = 0.0;
                    for k in 0..n {
                        acc += a.get(i, k) * b.get(k, j);
                    }
                    c.data[i * n + j] = acc;
                }
            }
        }
        Layout::ColMajor => {
            for j in 0..n {
                for i in 0..n {
                    let mut acc = 0.0;
                    for k in 0..n {
                        acc += a.get(k, i) * b.get(j, k);
                    }
                    c.data[i * n + j] = acc;
                }
            }
        }
    }
    c
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_row_major_product() {
        let (a, b) = inputs(2);
        let c = multiply(&a, &b, Layout::RowMajor);

        assert_eq!(c.data, vec![1.0, 0.0, 2.0, -1.0]);
    }

    #[test]
    fn test_col_major_access_pattern() {
        // C = (B * A)^T for the column-major variant
        let (a, b) = inputs(2);
        let c = multiply(&a, &b, Layout::ColMajor);

        assert_eq!(c.data, vec![-1.0, 0.0, -2.0, 1.0]);
    }

    #[rstest]
    #[case(Layout::RowMajor)]
    #[case(Layout::ColMajor)]
    fn test_empty_matrix(#[case] layout: Layout) {
        let (a, b) = inputs(0);
        assert_eq!(multiply(&a, &b, layout).checksum(), 0.0);
    }
}
