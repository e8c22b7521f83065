#[test]
fn dmatrix_rsvd_test() -> anyhow::Result<()> {
    use matrix_lite::dmatrix_rsvd::RSVD;

    let mut xx = nalgebra::DMatrix::<f32>::zeros(8, 8);
    xx.fill_with_identity();

    let (uu, ss, vv) = xx.rsvd(3, 1)?;

    // orthonormal factors, unit spectrum
    let utu = uu.transpose() * &uu;
    let vtv = vv.transpose() * &vv;
    for i in 0..3 {
        assert!((utu[(i, i)] - 1.0).abs() < 1e-4);
        assert!((vtv[(i, i)] - 1.0).abs() < 1e-4);
        assert!((ss[i] - 1.0).abs() < 1e-4);
    }

    Ok(())
}

#[test]
fn dmatrix_rsvd_reconstruction_test() -> anyhow::Result<()> {
    use matrix_lite::dmatrix_rsvd::RSVD;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    // low-rank matrix: X = A * B with inner dimension 3
    let mut rng = StdRng::seed_from_u64(9);
    let aa = matrix_lite::dmatrix_util::rnorm(12, 3, &mut rng);
    let bb = matrix_lite::dmatrix_util::rnorm(3, 7, &mut rng);
    let xx = &aa * &bb;

    let (uu, ss, vv) = xx.rsvd(3, 5)?;
    let approx = &uu * nalgebra::DMatrix::from_diagonal(&ss) * vv.transpose();

    let err = (&xx - &approx).norm() / xx.norm();
    assert!(err < 1e-3, "relative reconstruction error {} too large", err);

    Ok(())
}
